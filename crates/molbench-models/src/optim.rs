//! Adam optimizer over named parameter arrays.
//!
//! Moments are kept per parameter name so a whole network shares one
//! optimizer, and the state can be written into a checkpoint.
//!
//! ```text
//! m = beta1 * m + (1 - beta1) * g
//! v = beta2 * v + (1 - beta2) * g^2
//! p = p - lr * m_hat / (sqrt(v_hat) + epsilon)
//! ```

use std::collections::BTreeMap;

use ndarray::{Array, Dimension};

use molbench_checkpoint::OptimizerState;

const OPTIMIZER_TYPE: &str = "adam";

/// Adam with bias correction.
#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    /// Completed update steps.
    t: u64,
    m: BTreeMap<String, Vec<f32>>,
    v: BTreeMap<String, Vec<f32>>,
}

impl Adam {
    /// Creates an optimizer with the usual defaults for the decay rates.
    pub fn new(learning_rate: f32) -> Self {
        Self::with_params(learning_rate, 0.9, 0.999, 1e-7)
    }

    /// Creates an optimizer with explicit decay rates.
    pub fn with_params(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: BTreeMap::new(),
            v: BTreeMap::new(),
        }
    }

    /// Learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Completed update steps.
    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Starts a new step. Call once per minibatch before the updates.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Updates `param` in place from `grad`.
    pub fn update<D: Dimension>(&mut self, name: &str, param: &mut Array<f32, D>, grad: &Array<f32, D>) {
        let len = param.len();
        let m = self.m.entry(name.to_string()).or_default();
        let v = self.v.entry(name.to_string()).or_default();
        if m.len() != len || v.len() != len {
            m.clear();
            m.resize(len, 0.0);
            v.clear();
            v.resize(len, 0.0);
        }

        let t = self.t.max(1) as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        for (((p, &g), m), v) in param
            .iter_mut()
            .zip(grad.iter())
            .zip(m.iter_mut())
            .zip(v.iter_mut())
        {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    /// Snapshot for a checkpoint.
    pub fn to_state(&self) -> OptimizerState {
        let mut state = OptimizerState::new(OPTIMIZER_TYPE, f64::from(self.learning_rate), self.t);
        state.first_moments = self.m.clone();
        state.second_moments = self.v.clone();
        state
    }

    /// Restores from a snapshot. A snapshot of another optimizer type starts
    /// from fresh moments.
    pub fn from_state(state: &OptimizerState) -> Self {
        let mut adam = Self::new(state.learning_rate as f32);
        if state.optimizer_type != OPTIMIZER_TYPE {
            tracing::warn!(
                found = %state.optimizer_type,
                "Optimizer state is not adam; starting from fresh moments"
            );
            return adam;
        }
        adam.t = state.step;
        adam.m = state.first_moments.clone();
        adam.v = state.second_moments.clone();
        adam
    }
}
