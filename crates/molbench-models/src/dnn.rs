//! Multitask dense classifier: shared ReLU layers and one sigmoid output per task.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use molbench_checkpoint::ModelState;
use molbench_core::{DnnParams, Result};
use molbench_data::Dataset;

use crate::layers::{check_shape, sigmoid, weighted_sigmoid_cross_entropy, Dense, HiddenStack};
use crate::model::{dense_input, shuffled_batches, Network};
use crate::optim::Adam;

/// Fully connected multitask network.
#[derive(Debug, Clone)]
pub struct MultitaskClassifier {
    params: DnnParams,
    hidden: HiddenStack,
    head: Dense,
    optimizer: Adam,
}

impl MultitaskClassifier {
    /// Registry name.
    pub const ARCHITECTURE: &'static str = "multitask_dnn";

    /// Builds a freshly initialized network.
    pub fn new<R: Rng + ?Sized>(
        n_features: usize,
        n_tasks: usize,
        params: DnnParams,
        rng: &mut R,
    ) -> Self {
        let hidden = HiddenStack::new(n_features, &params.layer_sizes, &params.dropouts, rng);
        let head = Dense::glorot(hidden.out_features(n_features), n_tasks, rng);
        Self {
            optimizer: Adam::new(params.learning_rate),
            params,
            hidden,
            head,
        }
    }

    fn logits(&self, x: &Array2<f32>) -> Array2<f32> {
        self.head.forward(&self.hidden.forward(x))
    }
}

impl Network for MultitaskClassifier {
    fn architecture(&self) -> &'static str {
        Self::ARCHITECTURE
    }

    fn train_epoch(&mut self, dataset: &Dataset, rng: &mut StdRng) -> Result<f32> {
        let x = dense_input(dataset, Self::ARCHITECTURE)?;
        let batches = shuffled_batches(dataset.len(), self.params.batch_size, rng);
        let mut total = 0.0;
        for batch in &batches {
            let xb = x.select(Axis(0), batch);
            let yb = dataset.y().select(Axis(0), batch);
            let wb = dataset.w().select(Axis(0), batch);

            let (h, caches) = self.hidden.forward_train(&xb, rng);
            let logits = self.head.forward(&h);
            let (loss, grad) = weighted_sigmoid_cross_entropy(&logits, &yb, &wb);
            total += loss;

            self.optimizer.begin_step();
            let decay = self.params.weight_decay;
            let (grad_h, head_grad) = self.head.backward(&h, &grad);
            self.head.apply("head", &head_grad, decay, &mut self.optimizer);
            self.hidden
                .backward("hidden", &caches, grad_h, decay, &mut self.optimizer);
        }
        Ok(total / batches.len().max(1) as f32)
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        let x = dense_input(dataset, Self::ARCHITECTURE)?;
        Ok(self.logits(x).mapv(sigmoid))
    }

    fn save_state(&self, state: &mut ModelState) {
        self.hidden.save("hidden", state);
        self.head.save("head", state);
        state.optimizer = Some(self.optimizer.to_state());
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let hidden = HiddenStack::load(
            "hidden",
            self.hidden.layers.len(),
            &self.params.dropouts,
            state,
        )?;
        for (i, (expected, found)) in self.hidden.layers.iter().zip(&hidden.layers).enumerate() {
            check_shape(&format!("hidden{i}"), expected, found)?;
        }
        let head = Dense::load("head", state)?;
        check_shape("head", &self.head, &head)?;

        self.hidden = hidden;
        self.head = head;
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

    fn separable() -> Dataset {
        let x = array![[0.0, 1.0], [0.1, 0.9], [1.0, 0.0], [0.9, 0.2]];
        let y = array![[0.0], [0.0], [1.0], [1.0]];
        Dataset::from_dense(x, y, vec!["t".into()]).unwrap()
    }

    #[test]
    fn test_loss_decreases() {
        let mut rng = StdRng::seed_from_u64(7);
        let params = DnnParams {
            layer_sizes: vec![16],
            learning_rate: 0.01,
            ..DnnParams::default()
        }
        .with_uniform_dropout(0.0);
        let mut net = MultitaskClassifier::new(2, 1, params, &mut rng);
        let ds = separable();
        let first = net.train_epoch(&ds, &mut rng).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net.train_epoch(&ds, &mut rng).unwrap();
        }
        assert!(last < first);
        let p = net.predict(&ds).unwrap();
        assert!(p[[2, 0]] > p[[0, 0]]);
    }

    #[test]
    fn test_state_roundtrip_predicts_identically() {
        let mut rng = StdRng::seed_from_u64(8);
        let params = DnnParams {
            layer_sizes: vec![4, 3],
            dropouts: vec![0.0, 0.0],
            ..DnnParams::default()
        };
        let net = MultitaskClassifier::new(2, 1, params.clone(), &mut rng);
        let mut state = ModelState::new("tf", 0);
        net.save_state(&mut state);

        let mut fresh = MultitaskClassifier::new(2, 1, params, &mut rng);
        fresh.load_state(&state).unwrap();
        let ds = separable();
        assert_eq!(fresh.predict(&ds).unwrap(), net.predict(&ds).unwrap());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut rng = StdRng::seed_from_u64(9);
        let net = MultitaskClassifier::new(2, 1, DnnParams::default(), &mut rng);
        let mut state = ModelState::new("tf", 0);
        net.save_state(&mut state);
        let mut wider = MultitaskClassifier::new(5, 1, DnnParams::default(), &mut rng);
        assert!(wider.load_state(&state).unwrap_err().is_load());
    }
}
