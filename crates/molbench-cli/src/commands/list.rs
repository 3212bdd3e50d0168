//! List command implementation

use anyhow::Result;
use clap::Args;

use molbench_core::ModelFamily;
use molbench_data::DatasetName;
use molbench_models::{default_architecture, SINGLETASK_ARCHITECTURE};

/// List supported datasets and model families
#[derive(Args, Debug, Clone)]
pub struct ListCommand {
    /// Print JSON instead of a table
    #[arg(long, default_value = "false")]
    pub json: bool,
}

impl ListCommand {
    /// Execute the list command
    pub fn run(&self) -> Result<()> {
        if self.json {
            let datasets: Vec<_> = DatasetName::ALL
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.as_str(),
                        "in_all": DatasetName::SWEEP.contains(d),
                    })
                })
                .collect();
            let models: Vec<_> = ModelFamily::ALL
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "key": m.key(),
                        "label": m.result_label(),
                        "featurizer": m.featurizer().as_str(),
                        "architecture": architecture(*m),
                    })
                })
                .collect();
            let out = serde_json::json!({ "datasets": datasets, "models": models });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        println!("Datasets:");
        for dataset in DatasetName::ALL {
            let note = if DatasetName::SWEEP.contains(&dataset) {
                ""
            } else {
                " (not in `all`)"
            };
            println!("  {dataset}{note}");
        }
        println!("Models:");
        for family in ModelFamily::ALL {
            println!(
                "  {:<10} {:<14} {:<10} {}",
                family.key(),
                family.result_label(),
                family.featurizer().as_str(),
                architecture(family)
            );
        }
        Ok(())
    }
}

fn architecture(family: ModelFamily) -> &'static str {
    default_architecture(family).unwrap_or(SINGLETASK_ARCHITECTURE)
}
