//! Model families and featurizer kinds.
//!
//! Model families are a closed set. Strings such as `"rf"` or `"graphconv"`
//! are parsed once at the configuration boundary and everything downstream
//! dispatches on the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MolbenchError;

/// Featurization applied to raw molecules before training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeaturizerKind {
    /// Hashed circular fingerprint, 1024 bits.
    Ecfp,
    /// Per-atom feature matrix plus adjacency.
    GraphConv,
}

impl FeaturizerKind {
    /// Stable name used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecfp => "ECFP",
            Self::GraphConv => "GraphConv",
        }
    }
}

impl fmt::Display for FeaturizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeaturizerKind {
    type Err = MolbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ecfp" => Ok(Self::Ecfp),
            "graphconv" | "graph_conv" => Ok(Self::GraphConv),
            other => Err(MolbenchError::config(format!(
                "Featurizer '{other}' not supported"
            ))),
        }
    }
}

/// The model families a benchmark can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Random forest, fanned out one forest per task.
    #[serde(rename = "rf")]
    RandomForest,
    /// Multitask dense network.
    #[serde(rename = "tf")]
    MultitaskDnn,
    /// Multitask dense network with per-task bypass layers.
    #[serde(rename = "tf_robust")]
    RobustMultitask,
    /// Per-task logistic regression.
    #[serde(rename = "logreg")]
    LogisticRegression,
    /// Graph convolution network over molecular graphs.
    #[serde(rename = "graphconv")]
    GraphConv,
}

impl ModelFamily {
    /// All families in a stable order.
    pub const ALL: [ModelFamily; 5] = [
        ModelFamily::RandomForest,
        ModelFamily::MultitaskDnn,
        ModelFamily::RobustMultitask,
        ModelFamily::LogisticRegression,
        ModelFamily::GraphConv,
    ];

    /// Short key used in configs and on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            Self::RandomForest => "rf",
            Self::MultitaskDnn => "tf",
            Self::RobustMultitask => "tf_robust",
            Self::LogisticRegression => "logreg",
            Self::GraphConv => "graphconv",
        }
    }

    /// Label written next to scores in the results file.
    pub fn result_label(&self) -> &'static str {
        match self {
            Self::RandomForest => "random_forest",
            Self::MultitaskDnn => "tensorflow",
            Self::RobustMultitask => "tf_robust",
            Self::LogisticRegression => "logreg",
            Self::GraphConv => "graphconv",
        }
    }

    /// Featurizer this family consumes.
    pub fn featurizer(&self) -> FeaturizerKind {
        match self {
            Self::GraphConv => FeaturizerKind::GraphConv,
            _ => FeaturizerKind::Ecfp,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelFamily {
    type Err = MolbenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rf" | "random_forest" => Ok(Self::RandomForest),
            "tf" | "dnn" | "multitask_dnn" => Ok(Self::MultitaskDnn),
            "tf_robust" | "robust" => Ok(Self::RobustMultitask),
            "logreg" | "logistic_regression" => Ok(Self::LogisticRegression),
            "graphconv" | "graph_conv" => Ok(Self::GraphConv),
            other => Err(MolbenchError::config(format!("Model '{other}' not supported"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trips_through_key() {
        for family in ModelFamily::ALL {
            assert_eq!(family.key().parse::<ModelFamily>().unwrap(), family);
        }
    }

    #[test]
    fn test_unknown_family_is_config_error() {
        let err = "svm".parse::<ModelFamily>().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("svm"));
    }

    #[test]
    fn test_featurizer_choice() {
        assert_eq!(ModelFamily::GraphConv.featurizer(), FeaturizerKind::GraphConv);
        assert_eq!(ModelFamily::RandomForest.featurizer(), FeaturizerKind::Ecfp);
        assert!("morgan".parse::<FeaturizerKind>().is_err());
    }

    #[test]
    fn test_serde_uses_short_keys() {
        let json = serde_json::to_string(&ModelFamily::RobustMultitask).unwrap();
        assert_eq!(json, "\"tf_robust\"");
        let parsed: ModelFamily = serde_json::from_str("\"graphconv\"").unwrap();
        assert_eq!(parsed, ModelFamily::GraphConv);
    }
}
