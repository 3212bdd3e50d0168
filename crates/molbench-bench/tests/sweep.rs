use std::fs;
use std::path::Path;

use molbench_bench::{BenchmarkConfig, BenchmarkDriver, ResultsFormat, ResultsWriter, Stage};
use molbench_core::{ForestParams, HyperParams, LogRegParams, ModelFamily};
use molbench_models::{Metric, MetricKind};
use tempfile::tempdir;

const SMILES: [&str; 10] = [
    "CCO", "c1ccccc1", "CC(=O)O", "CCN", "ClCCl", "c1ccncc1", "CCCC", "OCCO", "C1CCCCC1", "CC#N",
];

fn write_tox21(dir: &Path) {
    let mut csv = String::from("mol_id,smiles,NR-AR,SR-MMP\n");
    for i in 0..20 {
        let smiles = SMILES[i % SMILES.len()];
        let aromatic = smiles.contains('c') as u8;
        csv.push_str(&format!("m{i},{smiles},{aromatic},{}\n", (i % 2) as u8));
    }
    fs::write(dir.join("tox21.csv"), csv).unwrap();
}

fn logreg() -> HyperParams {
    HyperParams::LogReg(LogRegParams {
        nb_epoch: 2,
        ..LogRegParams::default()
    })
}

#[test]
fn sweep_records_runs_and_skips_missing_dataset() {
    let data = tempdir().unwrap();
    let base = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_tox21(data.path());
    let stale = base.path().join("stale.txt");
    fs::write(&stale, "left over").unwrap();

    let config = BenchmarkConfig::default()
        .with_datasets(["tox21", "sider"])
        .with_model(ModelFamily::LogisticRegression)
        .with_hyperparams(logreg())
        .with_data_dir(data.path())
        .with_base_dir(base.path())
        .with_out_path(out.path());
    let summary = BenchmarkDriver::new(config).run().unwrap();

    assert!(!stale.exists());
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].dataset, "tox21");
    assert_eq!(summary.records[0].model, "logreg");
    assert!(summary.records[0].train.is_some());

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].dataset, "sider");
    assert_eq!(summary.failures[0].stage, Stage::Load);
    assert!(!summary.is_clean());

    let text = fs::read_to_string(out.path().join("results.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[..3], ["", "", "0"]);
    assert!(lines[3].starts_with("tox21,train,logreg,"));
    assert!(lines[4].starts_with("tox21,valid,logreg,"));
    assert!(lines[5].starts_with("tox21,time_for_running,"));
    assert_eq!(lines.len(), 6);
}

#[test]
fn repeated_sweeps_append_to_results_outside_base_dir() {
    let data = tempdir().unwrap();
    let root = tempdir().unwrap();
    write_tox21(data.path());

    let config = BenchmarkConfig::default()
        .with_datasets(["tox21"])
        .with_model(ModelFamily::LogisticRegression)
        .with_hyperparams(logreg())
        .with_data_dir(data.path())
        .with_base_dir(root.path().join("base"))
        .with_out_path(root.path());
    assert!(config.clean_base_dir);
    for _ in 0..2 {
        let summary = BenchmarkDriver::new(config.clone()).run().unwrap();
        assert!(summary.is_clean(), "{:?}", summary.failures);
    }

    let text = fs::read_to_string(root.path().join("results.csv")).unwrap();
    let blocks = text.lines().filter(|l| l.starts_with("tox21,train,")).count();
    assert_eq!(blocks, 2);
}

#[test]
fn forest_sweep_saves_each_configuration() {
    let data = tempdir().unwrap();
    let base = tempdir().unwrap();
    write_tox21(data.path());

    let forest = |n| {
        HyperParams::Forest(ForestParams {
            n_jobs: Some(1),
            ..ForestParams::default().with_n_estimators(n)
        })
    };
    let config = BenchmarkConfig::default()
        .with_datasets(["tox21"])
        .with_model(ModelFamily::RandomForest)
        .with_hyperparams(forest(3))
        .with_hyperparams(forest(5))
        .with_data_dir(data.path())
        .with_base_dir(base.path())
        .with_out_path(base.path())
        .with_results_format(ResultsFormat::JsonLines)
        .with_save_models(true);
    let driver = BenchmarkDriver::new(config);
    let summary = driver.run().unwrap();

    assert!(summary.is_clean(), "{:?}", summary.failures);
    let runs: Vec<usize> = summary.records.iter().map(|r| r.run).collect();
    assert_eq!(runs, vec![0, 1]);

    let model_dir = base.path().join("tox21").join("model_rf");
    assert!(model_dir.join("manifest.json").is_file());
    assert!(model_dir.join("NR-AR").join("manifest.json").is_file());

    let records = ResultsWriter::read_json_lines(&base.path().join("results.jsonl")).unwrap();
    assert_eq!(records, summary.records);
    assert!(records.iter().all(|r| r.model == "random_forest"));
    assert!(records.iter().all(|r| r.metric == "mean-roc_auc_score"));
}

#[test]
fn configuration_errors_abort_before_any_work() {
    let root = tempdir().unwrap();
    let base = root.path().join("base");
    let config = BenchmarkConfig::default()
        .with_datasets(["qm9"])
        .with_base_dir(&base)
        .with_out_path(&base);
    let err = BenchmarkDriver::new(config).run().unwrap_err();
    assert!(err.is_config());
    assert!(!base.exists());

    let config = BenchmarkConfig::default()
        .with_model(ModelFamily::GraphConv)
        .with_hyperparams(logreg())
        .with_base_dir(&base);
    assert!(BenchmarkDriver::new(config).run().unwrap_err().is_config());

    let mut config = BenchmarkConfig::default()
        .with_datasets(["tox21"])
        .with_base_dir(&base);
    config.metric = Metric::new(MetricKind::RocAuc);
    assert!(BenchmarkDriver::new(config).run().unwrap_err().is_config());
    assert!(!base.exists());
}
