use std::path::PathBuf;

use clap::Parser;
use molbench_bench::ResultsFormat;
use molbench_cli::{Cli, Commands};
use molbench_core::ModelFamily;

#[test]
fn cli_parses_run_flags_over_defaults() {
    let cli = Cli::parse_from([
        "molbench",
        "run",
        "--dataset",
        "tox21",
        "--dataset",
        "sider",
        "--model",
        "rf",
        "--base-dir",
        "/tmp/molbench_base",
        "--seed",
        "7",
        "--json-lines",
    ]);
    let Commands::Run(cmd) = cli.command else {
        panic!("expected run");
    };
    assert_eq!(cmd.model, Some(ModelFamily::RandomForest));

    let config = cmd.to_config().unwrap();
    assert_eq!(config.datasets, vec!["tox21".to_string(), "sider".to_string()]);
    assert_eq!(config.model, ModelFamily::RandomForest);
    assert_eq!(config.seed, 7);
    assert_eq!(config.base_dir, PathBuf::from("/tmp/molbench_base"));
    assert_eq!(config.out_path, PathBuf::from("/tmp"));
    assert_eq!(config.results_format, ResultsFormat::JsonLines);
    assert!(config.validate().is_ok());
}

#[test]
fn run_without_flags_is_the_default_sweep() {
    let cli = Cli::parse_from(["molbench", "run"]);
    let Commands::Run(cmd) = cli.command else {
        panic!("expected run");
    };
    let config = cmd.to_config().unwrap();
    assert_eq!(config.datasets, vec!["muv".to_string()]);
    assert_eq!(config.model, ModelFamily::MultitaskDnn);
    assert_eq!(config.hyperparam_sets().len(), 1);
    assert_eq!(config.results_path(), PathBuf::from("/tmp/results.csv"));
    assert!(config.clean_base_dir);
}

#[test]
fn run_flags_override_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.json");
    std::fs::write(
        &path,
        r#"{"datasets": ["all"], "model": "logreg", "hyperparams": [{"model": "logreg", "nb_epoch": 2}]}"#,
    )
    .unwrap();
    let cli = Cli::parse_from([
        "molbench",
        "run",
        "--config",
        path.to_str().unwrap(),
        "--model",
        "logreg",
        "--keep-base-dir",
    ]);
    let Commands::Run(cmd) = cli.command else {
        panic!("expected run");
    };
    let config = cmd.to_config().unwrap();
    assert_eq!(config.validate().unwrap().len(), 5);
    // same family keeps the file's hyperparameter sets
    assert_eq!(config.hyperparams.len(), 1);
    assert!(!config.clean_base_dir);
}

#[test]
fn cli_rejects_unknown_model() {
    assert!(Cli::try_parse_from(["molbench", "run", "--model", "svm"]).is_err());
    assert!(Cli::try_parse_from(["molbench", "verify-reload"]).is_err());
}

#[test]
fn verify_reload_round_trips_logreg() {
    let dir = tempfile::tempdir().unwrap();
    let cli = Cli::parse_from([
        "molbench",
        "verify-reload",
        "--model",
        "logreg",
        "--model-dir",
        dir.path().to_str().unwrap(),
    ]);
    let Commands::VerifyReload(cmd) = cli.command else {
        panic!("expected verify-reload");
    };
    assert_eq!(cmd.samples, 10);
    cmd.run().unwrap();
    assert!(dir.path().join("manifest.json").is_file());
}

#[test]
fn list_runs() {
    let cli = Cli::parse_from(["molbench", "list", "--json"]);
    let Commands::List(cmd) = cli.command else {
        panic!("expected list");
    };
    cmd.run().unwrap();
}
