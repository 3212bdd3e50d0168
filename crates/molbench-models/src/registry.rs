//! Architecture registry and model construction.
//!
//! Network families record an architecture name in their manifest. On reload
//! the name is looked up here to rebuild an empty network before its state is
//! restored. A registry missing the name makes reload fail with
//! [`LoadError::MissingFactory`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;

use molbench_core::{HyperParams, LoadError, ModelFamily, MolbenchError, Result};

use crate::dnn::MultitaskClassifier;
use crate::forest::RandomForestModel;
use crate::graph_conv::GraphConvModel;
use crate::logreg::LogisticRegressionModel;
use crate::model::{Model, Network, NetworkModel};
use crate::robust::RobustMultitaskClassifier;
use crate::singletask::SingletaskToMultitask;
use crate::storage::DEFAULT_MAX_TO_KEEP;

/// What a factory needs to build a network.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchitectureSpec {
    /// Input width.
    pub n_features: usize,
    /// Output columns.
    pub n_tasks: usize,
    /// Hyperparameters of the owning model.
    pub hyperparams: HyperParams,
}

/// Builds a freshly initialized network.
pub type NetworkFactory =
    Arc<dyn Fn(&ArchitectureSpec, &mut StdRng) -> Result<Box<dyn Network>> + Send + Sync>;

/// Architecture name of each network family.
pub fn default_architecture(family: ModelFamily) -> Option<&'static str> {
    match family {
        ModelFamily::MultitaskDnn => Some(MultitaskClassifier::ARCHITECTURE),
        ModelFamily::RobustMultitask => Some(RobustMultitaskClassifier::ARCHITECTURE),
        ModelFamily::LogisticRegression => Some(LogisticRegressionModel::ARCHITECTURE),
        ModelFamily::GraphConv => Some(GraphConvModel::ARCHITECTURE),
        ModelFamily::RandomForest => None,
    }
}

fn wrong_params(architecture: &str, hyperparams: &HyperParams) -> MolbenchError {
    MolbenchError::config(format!(
        "architecture '{architecture}' cannot use {} hyperparameters",
        hyperparams.family()
    ))
}

/// Network factories keyed by architecture name.
#[derive(Clone)]
pub struct ArchitectureRegistry {
    factories: BTreeMap<String, NetworkFactory>,
}

impl ArchitectureRegistry {
    /// A registry with no architectures.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every built-in architecture.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(MultitaskClassifier::ARCHITECTURE, |spec, rng| {
            match &spec.hyperparams {
                HyperParams::Dnn(p) => Ok(Box::new(MultitaskClassifier::new(
                    spec.n_features,
                    spec.n_tasks,
                    p.clone(),
                    rng,
                )) as Box<dyn Network>),
                other => Err(wrong_params(MultitaskClassifier::ARCHITECTURE, other)),
            }
        });
        registry.register(RobustMultitaskClassifier::ARCHITECTURE, |spec, rng| {
            match &spec.hyperparams {
                HyperParams::Robust(p) => Ok(Box::new(RobustMultitaskClassifier::new(
                    spec.n_features,
                    spec.n_tasks,
                    p.clone(),
                    rng,
                )) as Box<dyn Network>),
                other => Err(wrong_params(RobustMultitaskClassifier::ARCHITECTURE, other)),
            }
        });
        registry.register(LogisticRegressionModel::ARCHITECTURE, |spec, rng| {
            match &spec.hyperparams {
                HyperParams::LogReg(p) => Ok(Box::new(LogisticRegressionModel::new(
                    spec.n_features,
                    spec.n_tasks,
                    p.clone(),
                    rng,
                )) as Box<dyn Network>),
                other => Err(wrong_params(LogisticRegressionModel::ARCHITECTURE, other)),
            }
        });
        registry.register(GraphConvModel::ARCHITECTURE, |spec, rng| {
            match &spec.hyperparams {
                HyperParams::GraphConv(p) => Ok(Box::new(GraphConvModel::new(
                    spec.n_features,
                    spec.n_tasks,
                    p.clone(),
                    rng,
                )) as Box<dyn Network>),
                other => Err(wrong_params(GraphConvModel::ARCHITECTURE, other)),
            }
        });
        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ArchitectureSpec, &mut StdRng) -> Result<Box<dyn Network>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Returns true if `name` has a factory.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the network registered as `name`.
    pub fn build(
        &self,
        name: &str,
        spec: &ArchitectureSpec,
        rng: &mut StdRng,
    ) -> Result<Box<dyn Network>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LoadError::MissingFactory {
                architecture: name.to_string(),
            })?;
        factory(spec, rng)
    }
}

impl Default for ArchitectureRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ArchitectureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Constructs model adapters for a family.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    registry: Arc<ArchitectureRegistry>,
    max_to_keep: usize,
}

impl ModelBuilder {
    /// Creates a builder whose network adapters reload through `registry`.
    pub fn new(registry: Arc<ArchitectureRegistry>) -> Self {
        Self {
            registry,
            max_to_keep: DEFAULT_MAX_TO_KEEP,
        }
    }

    /// Sets checkpoint retention for every model built.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    /// The registry handed to network adapters.
    pub fn registry(&self) -> &Arc<ArchitectureRegistry> {
        &self.registry
    }

    /// Builds an unfitted adapter for `family` storing into `model_dir`.
    ///
    /// Fails with a configuration error if `hyperparams` belong to another
    /// family or do not validate. Random forests are wrapped in
    /// [`SingletaskToMultitask`] so they accept any number of tasks.
    pub fn build(
        &self,
        family: ModelFamily,
        hyperparams: &HyperParams,
        tasks: Vec<String>,
        model_dir: &Path,
    ) -> Result<Box<dyn Model>> {
        if hyperparams.family() != family {
            return Err(MolbenchError::config(format!(
                "hyperparameters for {} given to model {family}",
                hyperparams.family()
            )));
        }
        hyperparams.validate()?;
        let max_to_keep = self.max_to_keep;
        let model: Box<dyn Model> = match hyperparams {
            HyperParams::Forest(params) => {
                let params = params.clone();
                Box::new(SingletaskToMultitask::new(
                    family,
                    tasks,
                    model_dir,
                    move |task: &str, dir: &Path| {
                        Box::new(
                            RandomForestModel::new(params.clone(), vec![task.to_string()], dir)
                                .with_max_to_keep(max_to_keep),
                        ) as Box<dyn Model>
                    },
                ))
            }
            _ => Box::new(
                NetworkModel::new(hyperparams.clone(), tasks, model_dir, self.registry.clone())
                    .with_max_to_keep(max_to_keep),
            ),
        };
        Ok(model)
    }
}

/// Builds an adapter with default retention; see [`ModelBuilder::build`].
pub fn build_model(
    family: ModelFamily,
    hyperparams: &HyperParams,
    tasks: Vec<String>,
    model_dir: &Path,
    registry: Arc<ArchitectureRegistry>,
) -> Result<Box<dyn Model>> {
    ModelBuilder::new(registry).build(family, hyperparams, tasks, model_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use molbench_core::DnnParams;
    use rand::SeedableRng;

    #[test]
    fn test_defaults_cover_network_families() {
        let registry = ArchitectureRegistry::with_defaults();
        for family in ModelFamily::ALL {
            if let Some(name) = default_architecture(family) {
                assert!(registry.contains(name), "{name} missing");
            }
        }
        assert_eq!(registry.names().count(), 4);
    }

    #[test]
    fn test_missing_factory() {
        let spec = ArchitectureSpec {
            n_features: 3,
            n_tasks: 1,
            hyperparams: HyperParams::default_for(ModelFamily::MultitaskDnn),
        };
        let err = ArchitectureRegistry::empty()
            .build("multitask_dnn", &spec, &mut StdRng::seed_from_u64(0))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MolbenchError::Load(LoadError::MissingFactory { ref architecture }) if architecture == "multitask_dnn"
        ));
    }

    #[test]
    fn test_factory_rejects_foreign_params() {
        let spec = ArchitectureSpec {
            n_features: 3,
            n_tasks: 1,
            hyperparams: HyperParams::default_for(ModelFamily::LogisticRegression),
        };
        let err = ArchitectureRegistry::with_defaults()
            .build("graph_conv", &spec, &mut StdRng::seed_from_u64(0))
            .err()
            .unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_build_model_checks_family_and_params() {
        let registry = Arc::new(ArchitectureRegistry::with_defaults());
        let dir = Path::new("/tmp/unused");
        let dnn = HyperParams::default_for(ModelFamily::MultitaskDnn);
        let err = build_model(ModelFamily::GraphConv, &dnn, vec!["t".into()], dir, registry.clone())
            .err()
            .unwrap();
        assert!(err.is_config());

        let bad = HyperParams::Dnn(DnnParams {
            dropouts: vec![0.1, 0.1],
            ..DnnParams::default()
        });
        let err = build_model(ModelFamily::MultitaskDnn, &bad, vec!["t".into()], dir, registry.clone())
            .err()
            .unwrap();
        assert!(err.to_string().contains("one dropout per layer"));

        let rf = HyperParams::default_for(ModelFamily::RandomForest);
        let model = build_model(ModelFamily::RandomForest, &rf, vec!["a".into(), "b".into()], dir, registry)
            .unwrap();
        assert_eq!(model.family(), ModelFamily::RandomForest);
        assert_eq!(model.tasks().len(), 2);
        assert!(!model.is_fitted());
    }
}
