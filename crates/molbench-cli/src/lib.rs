//! molbench CLI library
//!
//! - **run**: a benchmark sweep from a JSON config and/or flags
//! - **verify-reload**: save/reload parity on a synthetic dataset
//! - **list**: supported datasets and model families
//!
//! # Example
//!
//! ```bash
//! # The default sweep: muv with the multitask network
//! molbench run --data-dir ./datasets
//!
//! # Random forests over every dataset
//! molbench run --dataset all --model rf --out-path ./results
//!
//! # Check that graph convolution models reload
//! molbench verify-reload --model graphconv
//! ```

pub mod commands;

use clap::{Parser, Subcommand};

pub use commands::{ListCommand, RunCommand, VerifyReloadCommand};

/// molbench - benchmark molecular property models
#[derive(Parser, Debug)]
#[command(name = "molbench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a benchmark sweep
    Run(RunCommand),

    /// Fit, save and reload a model, then compare scores
    VerifyReload(VerifyReloadCommand),

    /// List supported datasets and model families
    List(ListCommand),
}
