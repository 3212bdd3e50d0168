//! Composite adapter fanning a multitask dataset out to one model per task.

use std::path::{Path, PathBuf};

use ndarray::Array2;

use molbench_checkpoint::ModelManifest;
use molbench_core::{LoadError, ModelFamily, MolbenchError, Result, TrainingContext};
use molbench_data::{Dataset, Transformer};

use crate::metrics::{evaluate_tasks, Metric, Scores};
use crate::model::{FitOptions, Model};
use crate::storage;

/// Architecture name recorded in a composite manifest.
pub const SINGLETASK_ARCHITECTURE: &str = "singletask_to_multitask";

/// Probability reported for tasks that were skipped during fit.
pub const SKIPPED_TASK_PREDICTION: f32 = 0.5;

type SubModelBuilder = Box<dyn Fn(&str, &Path) -> Box<dyn Model> + Send + Sync>;

/// Directory name for a task's sub-model.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, so distinct task names
/// never share a directory.
fn task_dir_name(task: &str) -> String {
    if task.is_empty() {
        return "%".to_string();
    }
    if task == "." || task == ".." {
        return "%2E".repeat(task.len());
    }
    let mut name = String::with_capacity(task.len());
    for byte in task.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name
}

/// One single-task model per task, each in `<model_dir>/<task>`.
///
/// Tasks whose weights are all zero are skipped with a warning. Skipped tasks
/// are listed in the manifest, predicted as 0.5, and left out of evaluation.
pub struct SingletaskToMultitask {
    family: ModelFamily,
    tasks: Vec<String>,
    model_dir: PathBuf,
    builder: SubModelBuilder,
    models: Vec<Option<Box<dyn Model>>>,
    n_features: usize,
    fitted: bool,
}

impl SingletaskToMultitask {
    /// Creates an unfitted composite. `builder` makes the sub-model for a task
    /// given its name and directory.
    pub fn new<F>(
        family: ModelFamily,
        tasks: Vec<String>,
        model_dir: impl Into<PathBuf>,
        builder: F,
    ) -> Self
    where
        F: Fn(&str, &Path) -> Box<dyn Model> + Send + Sync + 'static,
    {
        let models = tasks.iter().map(|_| None).collect();
        Self {
            family,
            tasks,
            model_dir: model_dir.into(),
            builder: Box::new(builder),
            models,
            n_features: 0,
            fitted: false,
        }
    }

    /// Directory of the sub-model for `task`.
    pub fn task_dir(&self, task: &str) -> PathBuf {
        self.model_dir.join(task_dir_name(task))
    }

    /// Tasks without a sub-model.
    pub fn skipped_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .zip(&self.models)
            .filter(|(_, m)| m.is_none())
            .map(|(t, _)| t.clone())
            .collect()
    }

    fn active_tasks(&self) -> Vec<usize> {
        self.models
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_some())
            .map(|(t, _)| t)
            .collect()
    }
}

impl Model for SingletaskToMultitask {
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
        self.fitted
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
        if let Some(task) = self
            .tasks
            .iter()
            .enumerate()
            .find(|&(t, task)| self.tasks[..t].contains(task))
            .map(|(_, task)| task)
        {
            return Err(MolbenchError::config(format!(
                "task {task:?} appears more than once"
            )));
        }
        for t in 0..self.tasks.len() {
            let task = self.tasks[t].clone();
            if dataset.task_is_unweighted(t) {
                tracing::warn!(task = %task, "Skipping task with no weighted examples");
                continue;
            }
            let view = dataset.task_view(t)?;
            let dir = self.task_dir(&task);
            let mut child = ctx.child(task.clone());
            let model = self.models[t].get_or_insert_with(|| (self.builder)(&task, &dir));
            tracing::info!(task = %task, dir = %dir.display(), "Fitting task model");
            model.fit(&view, options, &mut child)?;
        }
        self.n_features = dataset.n_features();
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        if !self.fitted {
            return Err(MolbenchError::NotFitted);
        }
        let mut out = Array2::from_elem((dataset.len(), self.tasks.len()), SKIPPED_TASK_PREDICTION);
        for (t, model) in self.models.iter().enumerate() {
            if let Some(model) = model {
                // sub-models only read the features
                let column = model.predict(dataset)?;
                out.column_mut(t).assign(&column.column(0));
            }
        }
        Ok(out)
    }

    fn evaluate(
        &self,
        dataset: &Dataset,
        metrics: &[Metric],
        transformers: &[Transformer],
    ) -> Result<Scores> {
        let y_pred = self.predict(dataset)?;
        evaluate_tasks(dataset, &y_pred, metrics, transformers, &self.active_tasks())
    }

    fn save(&self) -> Result<()> {
        if !self.fitted {
            return Err(MolbenchError::NotFitted);
        }
        for model in self.models.iter().flatten() {
            model.save()?;
        }
        let mut manifest = ModelManifest::new(self.family, self.tasks.clone(), self.n_features)
            .with_architecture(SINGLETASK_ARCHITECTURE);
        manifest.epochs = 1;
        manifest.skipped_tasks = self.skipped_tasks();
        manifest.write(&self.model_dir)?;
        tracing::info!(
            dir = %self.model_dir.display(),
            tasks = self.tasks.len(),
            skipped = manifest.skipped_tasks.len(),
            "Saved composite model"
        );
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let manifest = storage::read_manifest(&self.model_dir, self.family)?;
        if manifest.architecture.as_deref() != Some(SINGLETASK_ARCHITECTURE) {
            return Err(LoadError::Corrupted(format!(
                "{} does not hold a per-task composite",
                self.model_dir.display()
            ))
            .into());
        }
        let mut models = Vec::with_capacity(manifest.tasks.len());
        for task in &manifest.tasks {
            if manifest.skipped_tasks.contains(task) {
                models.push(None);
                continue;
            }
            let mut model = (self.builder)(task, &self.task_dir(task));
            model.reload()?;
            models.push(Some(model));
        }
        self.tasks = manifest.tasks;
        self.models = models;
        self.n_features = manifest.n_features;
        self.fitted = true;
        tracing::info!(dir = %self.model_dir.display(), "Reloaded composite model");
        Ok(())
    }
}
