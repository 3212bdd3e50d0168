//! The model adapter contract and the adapter shared by network families.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use molbench_checkpoint::{ModelManifest, ModelState};
use molbench_core::{HyperParams, LoadError, ModelFamily, MolbenchError, Result, TrainingContext};
use molbench_data::{Dataset, Transformer};

use crate::metrics::{evaluate_predictions, Metric, Scores};
use crate::registry::{ArchitectureRegistry, ArchitectureSpec};
use crate::storage::{self, DEFAULT_MAX_TO_KEEP};

/// Options for one call to [`Model::fit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitOptions {
    /// Epochs to train; `None` uses the hyperparameter default.
    pub nb_epoch: Option<usize>,
}

impl FitOptions {
    /// Trains for exactly `nb_epoch` epochs.
    pub fn epochs(nb_epoch: usize) -> Self {
        Self {
            nb_epoch: Some(nb_epoch),
        }
    }
}

/// A trainable model bound to a storage directory.
///
/// Lifecycle: constructed unfitted, then [`fit`](Model::fit), then
/// [`save`](Model::save). A freshly constructed adapter pointing at the same
/// directory can [`reload`](Model::reload) and then predicts exactly as the
/// saved one did.
pub trait Model: Send {
    /// Family of this adapter.
    fn family(&self) -> ModelFamily;

    /// Directory the model saves into and reloads from.
    fn model_dir(&self) -> &Path;

    /// Task names, in prediction column order.
    fn tasks(&self) -> &[String];

    /// Returns true once fitted or reloaded.
    fn is_fitted(&self) -> bool;

    /// Trains on `dataset`. Calling again continues from the current parameters.
    fn fit(
        &mut self,
        dataset: &Dataset,
        options: &FitOptions,
        ctx: &mut TrainingContext,
    ) -> Result<()>;

    /// Probability of the positive class, one column per task.
    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>>;

    /// Predicts and scores `dataset`. The dataset is not modified.
    fn evaluate(
        &self,
        dataset: &Dataset,
        metrics: &[Metric],
        transformers: &[Transformer],
    ) -> Result<Scores> {
        let y_pred = self.predict(dataset)?;
        evaluate_predictions(dataset, &y_pred, metrics, transformers)
    }

    /// Writes the manifest and state into [`model_dir`](Model::model_dir).
    fn save(&self) -> Result<()>;

    /// Replaces the in-memory state with the one saved in the model directory.
    fn reload(&mut self) -> Result<()>;
}

/// A trainable network behind [`NetworkModel`].
///
/// Implementations are built by an [`ArchitectureRegistry`] factory and
/// restore their parameters from a [`ModelState`].
pub trait Network: Send {
    /// Name recorded in the manifest and used for registry lookup.
    fn architecture(&self) -> &'static str;

    /// Runs one pass over `dataset` and returns the mean batch loss.
    fn train_epoch(&mut self, dataset: &Dataset, rng: &mut StdRng) -> Result<f32>;

    /// Positive-class probabilities, one column per task.
    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>>;

    /// Writes parameters and optimizer moments.
    fn save_state(&self, state: &mut ModelState);

    /// Restores what [`save_state`](Network::save_state) wrote.
    fn load_state(&mut self, state: &ModelState) -> Result<()>;
}

/// [`Model`] adapter for the gradient-trained families.
pub struct NetworkModel {
    family: ModelFamily,
    hyperparams: HyperParams,
    tasks: Vec<String>,
    model_dir: PathBuf,
    registry: Arc<ArchitectureRegistry>,
    max_to_keep: usize,
    network: Option<Box<dyn Network>>,
    n_features: usize,
    epochs: u64,
}

impl NetworkModel {
    /// Creates an unfitted adapter. The network itself is built on the first
    /// fit, once the input width is known.
    pub fn new(
        hyperparams: HyperParams,
        tasks: Vec<String>,
        model_dir: impl Into<PathBuf>,
        registry: Arc<ArchitectureRegistry>,
    ) -> Self {
        Self {
            family: hyperparams.family(),
            hyperparams,
            tasks,
            model_dir: model_dir.into(),
            registry,
            max_to_keep: DEFAULT_MAX_TO_KEEP,
            network: None,
            n_features: 0,
            epochs: 0,
        }
    }

    /// Sets how many checkpoints the model directory retains.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    /// Hyperparameters in effect.
    pub fn hyperparams(&self) -> &HyperParams {
        &self.hyperparams
    }

    /// Completed training epochs.
    pub fn epochs(&self) -> u64 {
        self.epochs
    }

    /// Architecture of the current network, if built.
    pub fn architecture(&self) -> Option<&'static str> {
        self.network.as_ref().map(|n| n.architecture())
    }

    fn spec(&self, n_features: usize) -> ArchitectureSpec {
        ArchitectureSpec {
            n_features,
            n_tasks: self.tasks.len(),
            hyperparams: self.hyperparams.clone(),
        }
    }
}

impl Model for NetworkModel {
    fn family(&self) -> ModelFamily {
        self.family
    }

    fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    fn tasks(&self) -> &[String] {
        &self.tasks
    }

    fn is_fitted(&self) -> bool {
        self.network.is_some()
    }

    fn fit(
        &mut self,
        dataset: &Dataset,
        options: &FitOptions,
        ctx: &mut TrainingContext,
    ) -> Result<()> {
        if dataset.tasks() != self.tasks.as_slice() {
            return Err(MolbenchError::config(format!(
                "model has tasks {:?} but dataset has {:?}",
                self.tasks,
                dataset.tasks()
            )));
        }
        let n_features = dataset.n_features();
        if self.network.is_some() && self.n_features != n_features {
            return Err(MolbenchError::config(format!(
                "model was trained on {} features, dataset has {}",
                self.n_features, n_features
            )));
        }
        let mut network = match self.network.take() {
            Some(network) => network,
            None => {
                let architecture = crate::registry::default_architecture(self.family)
                    .ok_or_else(|| {
                        MolbenchError::config(format!("{} is not a network family", self.family))
                    })?;
                self.registry
                    .build(architecture, &self.spec(n_features), ctx.rng())?
            }
        };
        self.n_features = n_features;

        let nb_epoch = options
            .nb_epoch
            .or_else(|| self.hyperparams.nb_epoch())
            .unwrap_or(1);
        tracing::info!(
            family = %self.family,
            architecture = network.architecture(),
            samples = dataset.len(),
            nb_epoch,
            context = ctx.label(),
            "Fitting model"
        );
        let start = Instant::now();
        let mut result = Ok(());
        for epoch in 0..nb_epoch {
            match network.train_epoch(dataset, ctx.rng()) {
                Ok(loss) => {
                    self.epochs += 1;
                    tracing::debug!(epoch = self.epochs, loss, "Finished epoch");
                }
                Err(e) => {
                    tracing::warn!(epoch, error = %e, "Epoch failed");
                    result = Err(e);
                    break;
                }
            }
        }
        self.network = Some(network);
        result?;
        tracing::info!(
            family = %self.family,
            epochs = self.epochs,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fitted model"
        );
        Ok(())
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        let network = self.network.as_ref().ok_or(MolbenchError::NotFitted)?;
        if dataset.n_features() != self.n_features {
            return Err(MolbenchError::config(format!(
                "model expects {} features, dataset has {}",
                self.n_features,
                dataset.n_features()
            )));
        }
        network.predict(dataset)
    }

    fn save(&self) -> Result<()> {
        let network = self.network.as_ref().ok_or(MolbenchError::NotFitted)?;
        let mut state = ModelState::new(self.family.key(), self.epochs);
        network.save_state(&mut state);
        let checkpoint = storage::write_state(&self.model_dir, &state, self.max_to_keep)?;

        let mut manifest = ModelManifest::new(self.family, self.tasks.clone(), self.n_features)
            .with_architecture(network.architecture())
            .with_hyperparams(self.hyperparams.clone());
        manifest.epochs = self.epochs;
        manifest.checkpoint = Some(checkpoint);
        manifest.write(&self.model_dir)?;
        tracing::info!(
            family = %self.family,
            dir = %self.model_dir.display(),
            parameters = state.parameter_count(),
            "Saved model"
        );
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let manifest = storage::read_manifest(&self.model_dir, self.family)?;
        let architecture = manifest.architecture.clone().ok_or_else(|| {
            LoadError::Corrupted(format!(
                "manifest in {} names no architecture",
                self.model_dir.display()
            ))
        })?;
        let hyperparams = manifest
            .hyperparams
            .clone()
            .unwrap_or_else(|| self.hyperparams.clone());
        let spec = ArchitectureSpec {
            n_features: manifest.n_features,
            n_tasks: manifest.tasks.len(),
            hyperparams: hyperparams.clone(),
        };
        // Initial weights are overwritten by the checkpoint.
        let mut network = self
            .registry
            .build(&architecture, &spec, &mut StdRng::seed_from_u64(0))?;
        let state = storage::read_state(&self.model_dir, &manifest)?;
        network.load_state(&state)?;

        self.hyperparams = hyperparams;
        self.tasks = manifest.tasks;
        self.n_features = manifest.n_features;
        self.epochs = manifest.epochs;
        self.network = Some(network);
        tracing::info!(
            family = %self.family,
            architecture = %architecture,
            dir = %self.model_dir.display(),
            "Reloaded model"
        );
        Ok(())
    }
}

/// Shuffled minibatch indices for one epoch.
pub(crate) fn shuffled_batches(n: usize, batch_size: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    use rand::seq::SliceRandom;
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

/// Dense features of `dataset`, or a config error for graph input.
pub(crate) fn dense_input<'a>(dataset: &'a Dataset, architecture: &str) -> Result<&'a Array2<f32>> {
    dataset.dense().ok_or_else(|| {
        MolbenchError::config(format!("{architecture} needs dense features, got graphs"))
    })
}
