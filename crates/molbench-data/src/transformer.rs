//! Dataset transformers.
//!
//! A transformer is fitted on one dataset and then applied to every split, so
//! statistics come from the full data. `transform` returns a new dataset;
//! `untransform` maps model outputs and labels back to the original scale.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use molbench_core::Result;

use crate::dataset::Dataset;

/// A fitted dataset transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transformer {
    /// Reweights each task so both classes carry equal total weight.
    Balancing {
        /// Weight given to positive examples, per task.
        positive: Vec<f32>,
        /// Weight given to negative examples, per task.
        negative: Vec<f32>,
    },
}

impl Transformer {
    /// Fits class-balancing weights on `dataset`. Only rows with nonzero weight count.
    pub fn balancing(dataset: &Dataset) -> Self {
        let (y, w) = (dataset.y(), dataset.w());
        let mut positive = Vec::with_capacity(dataset.n_tasks());
        let mut negative = Vec::with_capacity(dataset.n_tasks());
        for t in 0..dataset.n_tasks() {
            let (mut pos, mut neg) = (0usize, 0usize);
            for (label, weight) in y.column(t).iter().zip(w.column(t)) {
                if *weight != 0.0 {
                    if *label > 0.5 {
                        pos += 1;
                    } else {
                        neg += 1;
                    }
                }
            }
            let total = (pos + neg) as f32;
            let weight_for = |count: usize| {
                if count == 0 {
                    1.0
                } else {
                    total / (2.0 * count as f32)
                }
            };
            positive.push(weight_for(pos));
            negative.push(weight_for(neg));
        }
        Self::Balancing { positive, negative }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Balancing { .. } => "balancing",
        }
    }

    /// Applies the transformer, returning a new dataset.
    pub fn transform(&self, dataset: &Dataset) -> Result<Dataset> {
        match self {
            Self::Balancing { positive, negative } => {
                let mut w = dataset.w().clone();
                for ((mut col, y), (pos, neg)) in w
                    .columns_mut()
                    .into_iter()
                    .zip(dataset.y().columns())
                    .zip(positive.iter().zip(negative))
                {
                    for (weight, label) in col.iter_mut().zip(y) {
                        if *weight != 0.0 {
                            *weight *= if *label > 0.5 { *pos } else { *neg };
                        }
                    }
                }
                dataset.with_weights(w)
            }
        }
    }

    /// Maps values on the transformed label scale back to the original scale.
    pub fn untransform(&self, values: &Array2<f32>) -> Array2<f32> {
        match self {
            // weights only; labels keep their scale
            Self::Balancing { .. } => values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn imbalanced() -> Dataset {
        let x = Array2::zeros((4, 1));
        let y = array![[1.0], [0.0], [0.0], [0.0]];
        Dataset::from_dense(x, y, vec!["t".into()]).unwrap()
    }

    #[test]
    fn test_balancing_equalizes_class_weight() {
        let ds = imbalanced();
        let tr = Transformer::balancing(&ds);
        let out = tr.transform(&ds).unwrap();
        let w = out.w().column(0).to_vec();
        assert!((w[0] - 2.0).abs() < 1e-6);
        let neg: f32 = w[1..].iter().sum();
        assert!((neg - w[0]).abs() < 1e-6);
        // labels untouched
        assert_eq!(out.y(), ds.y());
    }

    #[test]
    fn test_balancing_keeps_missing_labels_at_zero() {
        let ds = imbalanced();
        let mut w = ds.w().clone();
        w[[2, 0]] = 0.0;
        let ds = ds.with_weights(w).unwrap();
        let out = Transformer::balancing(&ds).transform(&ds).unwrap();
        assert_eq!(out.w()[[2, 0]], 0.0);
    }
}
