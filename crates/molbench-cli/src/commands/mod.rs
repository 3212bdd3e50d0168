//! CLI command implementations
//!
//! - [`run`]: benchmark sweeps
//! - [`verify`]: reload parity checks
//! - [`list`]: supported datasets and models

mod list;
mod run;
mod verify;

pub use list::ListCommand;
pub use run::RunCommand;
pub use verify::VerifyReloadCommand;

use molbench_core::ModelFamily;

/// Parses a model family for clap.
pub(crate) fn parse_family(s: &str) -> Result<ModelFamily, String> {
    s.parse().map_err(|e: molbench_core::MolbenchError| e.to_string())
}
