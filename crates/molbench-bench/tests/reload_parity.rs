use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use molbench_bench::{ReloadVerifier, DEFAULT_TOLERANCE};
use molbench_core::{
    DnnParams, ForestParams, HyperParams, LogRegParams, ModelFamily, MolbenchError, RobustParams,
    TrainingContext,
};
use molbench_data::Dataset;
use molbench_models::{build_model, ArchitectureRegistry, FitOptions, Metric, MetricKind, Model};

fn synthetic() -> Dataset {
    let mut rng = StdRng::seed_from_u64(123);
    let x = Array2::from_shape_fn((12, 3), |_| rng.gen::<f32>());
    let y = Array2::from_shape_fn((12, 2), |(i, t)| ((i + t) % 2) as f32);
    Dataset::from_dense(x, y, vec!["t0".into(), "t1".into()]).unwrap()
}

fn build(hp: &HyperParams, ds: &Dataset, dir: &Path) -> Box<dyn Model> {
    let registry = Arc::new(ArchitectureRegistry::with_defaults());
    build_model(hp.family(), hp, ds.tasks().to_vec(), dir, registry)
        .map_err(|e| e.to_string())
        .unwrap()
}

fn dense_families() -> Vec<HyperParams> {
    vec![
        HyperParams::Forest(ForestParams {
            n_jobs: Some(2),
            ..ForestParams::default().with_n_estimators(10)
        }),
        HyperParams::Dnn(DnnParams {
            layer_sizes: vec![8],
            nb_epoch: 3,
            ..DnnParams::default()
        }),
        HyperParams::Robust(RobustParams {
            layer_sizes: vec![8],
            bypass_layer_sizes: vec![2],
            nb_epoch: 3,
            ..RobustParams::default()
        }),
        HyperParams::LogReg(LogRegParams {
            nb_epoch: 3,
            ..LogRegParams::default()
        }),
    ]
}

#[test]
fn every_dense_family_reloads_with_parity() {
    let ds = synthetic();
    let metrics = [
        Metric::mean(MetricKind::RocAuc),
        Metric::new(MetricKind::Accuracy),
    ];
    for hp in dense_families() {
        let dir = tempdir().unwrap();
        let mut original = build(&hp, &ds, dir.path());
        original
            .fit(&ds, &FitOptions::default(), &mut TrainingContext::new(123))
            .unwrap();
        let mut fresh = build(&hp, &ds, dir.path());

        let report = ReloadVerifier::default()
            .verify(original.as_ref(), fresh.as_mut(), &ds, &metrics)
            .unwrap();
        assert!(report.passed(), "{}: {report:?}", hp.family());
        assert!(report.predictions_equal, "{}", hp.family());
        assert_eq!(report.max_abs_diff, 0.0);
        assert_eq!(report.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(report.original, report.reloaded);
    }
}

#[test]
fn verifier_rejects_mismatched_directories() {
    let ds = synthetic();
    let hp = HyperParams::default_for(ModelFamily::LogisticRegression);
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let original = build(&hp, &ds, a.path());
    let mut fresh = build(&hp, &ds, b.path());
    let err = ReloadVerifier::new(0.0)
        .verify(original.as_ref(), fresh.as_mut(), &ds, &[Metric::new(MetricKind::RocAuc)])
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn verifier_requires_a_fitted_model() {
    let ds = synthetic();
    let hp = HyperParams::default_for(ModelFamily::MultitaskDnn);
    let dir = tempdir().unwrap();
    let original = build(&hp, &ds, dir.path());
    let mut fresh = build(&hp, &ds, dir.path());
    let err = ReloadVerifier::default()
        .verify(original.as_ref(), fresh.as_mut(), &ds, &[Metric::new(MetricKind::RocAuc)])
        .unwrap_err();
    assert!(matches!(err, MolbenchError::NotFitted));
}
