//! Robust multitask classifier.
//!
//! A shared trunk feeds every task. Each task also has its own bypass stack
//! reading the raw input, and its output layer sees the concatenation of the
//! shared and bypass representations.

use ndarray::{concatenate, s, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use molbench_checkpoint::ModelState;
use molbench_core::{MolbenchError, Result, RobustParams};
use molbench_data::Dataset;

use crate::layers::{check_shape, sigmoid, weighted_sigmoid_cross_entropy, Dense, HiddenStack};
use crate::model::{dense_input, shuffled_batches, Network};
use crate::optim::Adam;

#[derive(Debug, Clone)]
struct TaskBranch {
    bypass: HiddenStack,
    head: Dense,
}

/// Multitask network with per-task bypass layers.
#[derive(Debug, Clone)]
pub struct RobustMultitaskClassifier {
    params: RobustParams,
    shared: HiddenStack,
    branches: Vec<TaskBranch>,
    optimizer: Adam,
}

fn join(a: &Array2<f32>, b: &Array2<f32>) -> Result<Array2<f32>> {
    concatenate(Axis(1), &[a.view(), b.view()])
        .map_err(|e| MolbenchError::config(format!("cannot join representations: {e}")))
}

impl RobustMultitaskClassifier {
    /// Registry name.
    pub const ARCHITECTURE: &'static str = "robust_multitask";

    /// Builds a freshly initialized network.
    pub fn new<R: Rng + ?Sized>(
        n_features: usize,
        n_tasks: usize,
        params: RobustParams,
        rng: &mut R,
    ) -> Self {
        let shared = HiddenStack::new(n_features, &params.layer_sizes, &params.dropouts, rng);
        let shared_out = shared.out_features(n_features);
        let branches = (0..n_tasks)
            .map(|_| {
                let bypass = HiddenStack::new(
                    n_features,
                    &params.bypass_layer_sizes,
                    &params.bypass_dropouts,
                    rng,
                );
                let head = Dense::glorot(shared_out + bypass.out_features(n_features), 1, rng);
                TaskBranch { bypass, head }
            })
            .collect();
        Self {
            optimizer: Adam::new(params.learning_rate),
            params,
            shared,
            branches,
        }
    }

    fn bypass_prefix(task: usize) -> String {
        format!("bypass{task}_")
    }
}

impl Network for RobustMultitaskClassifier {
    fn architecture(&self) -> &'static str {
        Self::ARCHITECTURE
    }

    fn train_epoch(&mut self, dataset: &Dataset, rng: &mut StdRng) -> Result<f32> {
        let x = dense_input(dataset, Self::ARCHITECTURE)?;
        let batches = shuffled_batches(dataset.len(), self.params.batch_size, rng);
        let n_tasks = self.branches.len();
        let mut total = 0.0;
        for batch in &batches {
            let xb = x.select(Axis(0), batch);
            let yb = dataset.y().select(Axis(0), batch);
            let wb = dataset.w().select(Axis(0), batch);

            let (h, shared_caches) = self.shared.forward_train(&xb, rng);
            let shared_width = h.ncols();
            let mut joined = Vec::with_capacity(n_tasks);
            let mut bypass_caches = Vec::with_capacity(n_tasks);
            let mut logits = Array2::zeros((batch.len(), n_tasks));
            for (t, branch) in self.branches.iter().enumerate() {
                let (b, caches) = branch.bypass.forward_train(&xb, rng);
                let z = join(&h, &b)?;
                logits
                    .column_mut(t)
                    .assign(&branch.head.forward(&z).column(0));
                joined.push(z);
                bypass_caches.push(caches);
            }
            let (loss, grad) = weighted_sigmoid_cross_entropy(&logits, &yb, &wb);
            total += loss;

            self.optimizer.begin_step();
            let mut grad_h = Array2::zeros(h.dim());
            for (t, branch) in self.branches.iter_mut().enumerate() {
                let grad_t = grad.slice(s![.., t..t + 1]).to_owned();
                let (grad_z, head_grad) = branch.head.backward(&joined[t], &grad_t);
                branch
                    .head
                    .apply(&format!("head{t}"), &head_grad, 0.0, &mut self.optimizer);
                grad_h += &grad_z.slice(s![.., ..shared_width]);
                let grad_b = grad_z.slice(s![.., shared_width..]).to_owned();
                branch.bypass.backward(
                    &Self::bypass_prefix(t),
                    &bypass_caches[t],
                    grad_b,
                    0.0,
                    &mut self.optimizer,
                );
            }
            self.shared
                .backward("shared", &shared_caches, grad_h, 0.0, &mut self.optimizer);
        }
        Ok(total / batches.len().max(1) as f32)
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        let x = dense_input(dataset, Self::ARCHITECTURE)?;
        let h = self.shared.forward(x);
        let mut out = Array2::zeros((x.nrows(), self.branches.len()));
        for (t, branch) in self.branches.iter().enumerate() {
            let z = join(&h, &branch.bypass.forward(x))?;
            out.column_mut(t)
                .assign(&branch.head.forward(&z).column(0).mapv(sigmoid));
        }
        Ok(out)
    }

    fn save_state(&self, state: &mut ModelState) {
        self.shared.save("shared", state);
        for (t, branch) in self.branches.iter().enumerate() {
            branch.bypass.save(&Self::bypass_prefix(t), state);
            branch.head.save(&format!("head{t}"), state);
        }
        state.set_metadata("n_tasks", self.branches.len().to_string());
        state.optimizer = Some(self.optimizer.to_state());
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let shared = HiddenStack::load(
            "shared",
            self.shared.layers.len(),
            &self.params.dropouts,
            state,
        )?;
        for (i, (expected, found)) in self.shared.layers.iter().zip(&shared.layers).enumerate() {
            check_shape(&format!("shared{i}"), expected, found)?;
        }
        let mut branches = Vec::with_capacity(self.branches.len());
        for (t, current) in self.branches.iter().enumerate() {
            let prefix = Self::bypass_prefix(t);
            let bypass = HiddenStack::load(
                &prefix,
                current.bypass.layers.len(),
                &self.params.bypass_dropouts,
                state,
            )?;
            for (i, (expected, found)) in
                current.bypass.layers.iter().zip(&bypass.layers).enumerate()
            {
                check_shape(&format!("{prefix}{i}"), expected, found)?;
            }
            let head = Dense::load(&format!("head{t}"), state)?;
            check_shape(&format!("head{t}"), &current.head, &head)?;
            branches.push(TaskBranch { bypass, head });
        }

        self.shared = shared;
        self.branches = branches;
        if let Some(opt) = &state.optimizer {
            self.optimizer = Adam::from_state(opt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn params() -> RobustParams {
        RobustParams {
            layer_sizes: vec![8],
            dropouts: vec![0.0],
            bypass_layer_sizes: vec![4],
            bypass_dropouts: vec![0.0],
            learning_rate: 0.01,
            ..RobustParams::default()
        }
    }

    fn two_task() -> Dataset {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.2, 0.8], [0.8, 0.1]];
        let y = array![[0.0, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
        Dataset::from_dense(x, y, vec!["a".into(), "b".into()]).unwrap()
    }

    #[test]
    fn test_predict_shape_and_learning() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = RobustMultitaskClassifier::new(2, 2, params(), &mut rng);
        let ds = two_task();
        let first = net.train_epoch(&ds, &mut rng).unwrap();
        let mut last = first;
        for _ in 0..150 {
            last = net.train_epoch(&ds, &mut rng).unwrap();
        }
        assert!(last < first);
        let p = net.predict(&ds).unwrap();
        assert_eq!(p.dim(), (4, 2));
        assert!(p[[1, 0]] > p[[0, 0]]);
        assert!(p[[0, 1]] > p[[1, 1]]);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut rng = StdRng::seed_from_u64(12);
        let net = RobustMultitaskClassifier::new(2, 2, params(), &mut rng);
        let mut state = ModelState::new("tf_robust", 0);
        net.save_state(&mut state);
        let mut fresh = RobustMultitaskClassifier::new(2, 2, params(), &mut rng);
        fresh.load_state(&state).unwrap();
        let ds = two_task();
        assert_eq!(fresh.predict(&ds).unwrap(), net.predict(&ds).unwrap());

        let mut three = RobustMultitaskClassifier::new(2, 3, params(), &mut rng);
        assert!(three.load_state(&state).is_err());
    }
}
