//! Dense layer and activation helpers with hand-written backpropagation.
//!
//! [`Dense`] performs `y = xW + b` where `W` has shape
//! `[in_features, out_features]`. Gradients are returned from
//! [`Dense::backward`] rather than cached on the layer, so a layer can be
//! shared by several forward passes in one batch.

use ndarray::{Array1, Array2, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use molbench_checkpoint::{CheckpointError, ModelState};

use crate::optim::Adam;

/// Gradients of one dense layer.
#[derive(Debug, Clone)]
pub struct DenseGrad {
    /// Gradient of the weight matrix.
    pub w: Array2<f32>,
    /// Gradient of the bias.
    pub b: Array1<f32>,
}

/// A fully connected layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    /// Weight matrix of shape [in_features, out_features]
    pub w: Array2<f32>,
    /// Bias vector of shape [out_features]
    pub b: Array1<f32>,
}

impl Dense {
    /// Creates a layer with Glorot uniform weights and zero bias.
    pub fn glorot<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (in_features + out_features).max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        let w = Array2::from_shape_fn((in_features, out_features), |_| dist.sample(rng));
        Self {
            w,
            b: Array1::zeros(out_features),
        }
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.w.nrows()
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.w.ncols()
    }

    /// Forward pass.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.w) + &self.b
    }

    /// Backward pass given the layer input and the gradient of the output.
    /// Returns the gradient of the input and of the parameters.
    pub fn backward(&self, x: &Array2<f32>, grad_out: &Array2<f32>) -> (Array2<f32>, DenseGrad) {
        let grad = DenseGrad {
            w: x.t().dot(grad_out),
            b: grad_out.sum_axis(Axis(0)),
        };
        (grad_out.dot(&self.w.t()), grad)
    }

    /// Applies `grad` through `optimizer`, adding L2 `weight_decay` to the
    /// weight gradient.
    pub fn apply(&mut self, name: &str, grad: &DenseGrad, weight_decay: f32, optimizer: &mut Adam) {
        if weight_decay > 0.0 {
            let decayed = &grad.w + &(&self.w * weight_decay);
            optimizer.update(&format!("{name}.w"), &mut self.w, &decayed);
        } else {
            optimizer.update(&format!("{name}.w"), &mut self.w, &grad.w);
        }
        optimizer.update(&format!("{name}.b"), &mut self.b, &grad.b);
    }

    /// Writes the parameters under `<name>.w` and `<name>.b`.
    pub fn save(&self, name: &str, state: &mut ModelState) {
        state.add_matrix(format!("{name}.w"), &self.w);
        state.add_vector(format!("{name}.b"), &self.b);
    }

    /// Reads parameters written by [`Dense::save`].
    pub fn load(name: &str, state: &ModelState) -> Result<Self, CheckpointError> {
        let w = state.matrix(&format!("{name}.w"))?;
        let b = state.vector(&format!("{name}.b"))?;
        if b.len() != w.ncols() {
            return Err(CheckpointError::Corrupted(format!(
                "layer '{name}': bias of length {} for {} outputs",
                b.len(),
                w.ncols()
            )));
        }
        Ok(Self { w, b })
    }
}

/// Fails unless `found` has the same shape as `expected`.
pub fn check_shape(name: &str, expected: &Dense, found: &Dense) -> Result<(), CheckpointError> {
    if expected.w.dim() != found.w.dim() {
        return Err(CheckpointError::Corrupted(format!(
            "layer '{name}' has shape {:?}, expected {:?}",
            found.w.dim(),
            expected.w.dim()
        )));
    }
    Ok(())
}

/// Element-wise rectified linear unit.
pub fn relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| v.max(0.0))
}

/// Gradient through a ReLU given its pre-activation.
pub fn relu_backward(pre: &Array2<f32>, mut grad: Array2<f32>) -> Array2<f32> {
    Zip::from(&mut grad).and(pre).for_each(|g, &p| {
        if p <= 0.0 {
            *g = 0.0;
        }
    });
    grad
}

/// Logistic function.
pub fn sigmoid(v: f32) -> f32 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

/// Inverted dropout mask: zero with probability `rate`, else `1 / (1 - rate)`.
pub fn dropout_mask<R: Rng + ?Sized>(rows: usize, cols: usize, rate: f32, rng: &mut R) -> Array2<f32> {
    if rate <= 0.0 {
        return Array2::ones((rows, cols));
    }
    let keep = 1.0 / (1.0 - rate);
    Array2::from_shape_fn((rows, cols), |_| if rng.gen::<f32>() < rate { 0.0 } else { keep })
}

/// Weighted sigmoid cross-entropy over logits.
///
/// Returns the mean loss over the batch and the gradient with respect to the
/// logits. Entries with zero weight contribute nothing.
pub fn weighted_sigmoid_cross_entropy(
    logits: &Array2<f32>,
    y: &Array2<f32>,
    w: &Array2<f32>,
) -> (f32, Array2<f32>) {
    let n = logits.nrows().max(1) as f32;
    let mut loss = 0.0f32;
    let mut grad = Array2::zeros(logits.dim());
    Zip::from(&mut grad)
        .and(logits)
        .and(y)
        .and(w)
        .for_each(|g, &z, &t, &wt| {
            // max(z, 0) - z*t + log(1 + exp(-|z|))
            loss += wt * (z.max(0.0) - z * t + (-z.abs()).exp().ln_1p());
            *g = wt * (sigmoid(z) - t) / n;
        });
    (loss / n, grad)
}

/// Pre-activation input and output of one hidden layer, kept for backprop.
#[derive(Debug, Clone)]
pub struct HiddenCache {
    /// Layer input.
    pub input: Array2<f32>,
    /// Pre-activation output.
    pub pre: Array2<f32>,
    /// Dropout mask applied after the activation.
    pub mask: Array2<f32>,
}

/// A stack of ReLU layers with dropout.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenStack {
    /// Layers, input side first.
    pub layers: Vec<Dense>,
    /// Dropout rate after each layer.
    pub dropouts: Vec<f32>,
}

impl HiddenStack {
    /// Builds a stack of `sizes` on top of `in_features` inputs.
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        sizes: &[usize],
        dropouts: &[f32],
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(sizes.len());
        let mut prev = in_features;
        for &size in sizes {
            layers.push(Dense::glorot(prev, size, rng));
            prev = size;
        }
        Self {
            layers,
            dropouts: dropouts.to_vec(),
        }
    }

    /// Output width, or `in_features` for an empty stack.
    pub fn out_features(&self, in_features: usize) -> usize {
        self.layers.last().map(Dense::out_features).unwrap_or(in_features)
    }

    /// Inference forward pass.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.layers
            .iter()
            .fold(x.clone(), |h, layer| relu(&layer.forward(&h)))
    }

    /// Training forward pass with dropout. Returns the output and the caches.
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        x: &Array2<f32>,
        rng: &mut R,
    ) -> (Array2<f32>, Vec<HiddenCache>) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();
        for (layer, &rate) in self.layers.iter().zip(&self.dropouts) {
            let pre = layer.forward(&h);
            let mask = dropout_mask(pre.nrows(), pre.ncols(), rate, rng);
            let out = relu(&pre) * &mask;
            caches.push(HiddenCache {
                input: std::mem::replace(&mut h, out),
                pre,
                mask,
            });
        }
        (h, caches)
    }

    /// Backward pass; applies updates and returns the gradient of the input.
    pub fn backward(
        &mut self,
        prefix: &str,
        caches: &[HiddenCache],
        mut grad: Array2<f32>,
        weight_decay: f32,
        optimizer: &mut Adam,
    ) -> Array2<f32> {
        for (i, (layer, cache)) in self.layers.iter_mut().zip(caches).enumerate().rev() {
            let grad_pre = relu_backward(&cache.pre, grad * &cache.mask);
            let (grad_in, dense_grad) = layer.backward(&cache.input, &grad_pre);
            layer.apply(&format!("{prefix}{i}"), &dense_grad, weight_decay, optimizer);
            grad = grad_in;
        }
        grad
    }

    /// Writes every layer under `<prefix><i>`.
    pub fn save(&self, prefix: &str, state: &mut ModelState) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.save(&format!("{prefix}{i}"), state);
        }
    }

    /// Reads `count` layers written by [`HiddenStack::save`].
    pub fn load(
        prefix: &str,
        count: usize,
        dropouts: &[f32],
        state: &ModelState,
    ) -> Result<Self, CheckpointError> {
        let layers = (0..count)
            .map(|i| Dense::load(&format!("{prefix}{i}"), state))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            layers,
            dropouts: dropouts.to_vec(),
        })
    }
}
