//! Per-task logistic regression with an L1 or L2 weight penalty.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use molbench_checkpoint::ModelState;
use molbench_core::{LogRegParams, PenaltyType, Result};
use molbench_data::Dataset;

use crate::layers::{check_shape, sigmoid, weighted_sigmoid_cross_entropy, Dense, DenseGrad};
use crate::model::{dense_input, shuffled_batches, Network};
use crate::optim::Adam;

/// One independent linear classifier per task, trained jointly.
#[derive(Debug, Clone)]
pub struct LogisticRegressionModel {
    params: LogRegParams,
    linear: Dense,
    optimizer: Adam,
}

impl LogisticRegressionModel {
    /// Registry name.
    pub const ARCHITECTURE: &'static str = "logistic_regression";

    /// Builds a freshly initialized model.
    pub fn new<R: Rng + ?Sized>(
        n_features: usize,
        n_tasks: usize,
        params: LogRegParams,
        rng: &mut R,
    ) -> Self {
        Self {
            linear: Dense::glorot(n_features, n_tasks, rng),
            optimizer: Adam::new(params.learning_rate),
            params,
        }
    }

    fn penalty_gradient(&self) -> Array2<f32> {
        let penalty = self.params.penalty;
        match self.params.penalty_type {
            PenaltyType::L1 => self.linear.w.mapv(|v| penalty * v.signum() * f32::from(v != 0.0)),
            PenaltyType::L2 => self.linear.w.mapv(|v| penalty * v),
        }
    }
}

impl Network for LogisticRegressionModel {
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

            let logits = self.linear.forward(&xb);
            let (loss, grad) = weighted_sigmoid_cross_entropy(&logits, &yb, &wb);
            total += loss;

            self.optimizer.begin_step();
            let (_, mut dense_grad) = self.linear.backward(&xb, &grad);
            if self.params.penalty > 0.0 {
                dense_grad = DenseGrad {
                    w: dense_grad.w + self.penalty_gradient(),
                    b: dense_grad.b,
                };
            }
            self.linear
                .apply("linear", &dense_grad, 0.0, &mut self.optimizer);
        }
        Ok(total / batches.len().max(1) as f32)
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        let x = dense_input(dataset, Self::ARCHITECTURE)?;
        Ok(self.linear.forward(x).mapv(sigmoid))
    }

    fn save_state(&self, state: &mut ModelState) {
        self.linear.save("linear", state);
        state.optimizer = Some(self.optimizer.to_state());
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let linear = Dense::load("linear", state)?;
        check_shape("linear", &self.linear, &linear)?;
        self.linear = linear;
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

    #[test]
    fn test_learns_linear_boundary() {
        let mut rng = StdRng::seed_from_u64(21);
        let params = LogRegParams {
            learning_rate: 0.05,
            penalty: 0.0,
            ..LogRegParams::default()
        };
        let mut model = LogisticRegressionModel::new(1, 1, params, &mut rng);
        let ds = Dataset::from_dense(
            array![[-2.0], [-1.0], [1.0], [2.0]],
            array![[0.0], [0.0], [1.0], [1.0]],
            vec!["t".into()],
        )
        .unwrap();
        for _ in 0..200 {
            model.train_epoch(&ds, &mut rng).unwrap();
        }
        let p = model.predict(&ds).unwrap();
        assert!(p[[0, 0]] < 0.5 && p[[3, 0]] > 0.5);
    }

    #[test]
    fn test_l1_penalty_shrinks_weights() {
        let mut rng = StdRng::seed_from_u64(22);
        let ds = Dataset::from_dense(
            array![[1.0, 0.3], [0.0, 0.3], [1.0, 0.3], [0.0, 0.3]],
            array![[1.0], [0.0], [1.0], [0.0]],
            vec!["t".into()],
        )
        .unwrap();
        let train = |penalty: f32, rng: &mut StdRng| {
            let params = LogRegParams {
                learning_rate: 0.05,
                penalty,
                penalty_type: PenaltyType::L1,
                ..LogRegParams::default()
            };
            let mut model = LogisticRegressionModel::new(2, 1, params, &mut StdRng::seed_from_u64(1));
            for _ in 0..300 {
                model.train_epoch(&ds, rng).unwrap();
            }
            model.linear.w.iter().map(|v| v.abs()).sum::<f32>()
        };
        let free = train(0.0, &mut rng);
        let penalized = train(1.0, &mut rng);
        assert!(penalized < free);
    }
}
