use std::fs;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use molbench_core::FeaturizerKind;
use molbench_data::{
    DatasetLoader, DatasetName, FeatureCache, Features, Splitter, Transformer, GRAPH_ATOM_FEATURES,
};

const CSV: &str = "\
mol_id,smiles,NR-AR,SR-MMP
m0,CCO,1,0
m1,c1ccccc1,0,
m2,CC(=O)O,0,1
m3,not_a_smiles,1,1
m4,CCN,1,0
m5,ClCCl,0,0
m6,c1ccncc1,0,1
m7,CCCC,1,0
m8,OCCO,0,0
m9,C1CCCCC1,0,1
m10,CC#N,1,0
";

fn write_raw(dir: &std::path::Path, name: &str) {
    fs::write(dir.join(format!("{name}.csv")), CSV).unwrap();
}

#[test]
fn load_drops_bad_smiles_and_marks_missing_labels() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "tox21");

    let loaded = DatasetLoader::new(dir.path())
        .load(DatasetName::Tox21, FeaturizerKind::Ecfp)
        .unwrap();

    assert_eq!(loaded.tasks, vec!["NR-AR".to_string(), "SR-MMP".to_string()]);
    // 10 valid rows: 8 / 1 / 1
    assert_eq!(loaded.train.len(), 8);
    assert_eq!(loaded.valid.len(), 1);
    assert_eq!(loaded.test.len(), 1);
    assert!(!loaded.train.ids().contains(&"m3".to_string()));
    assert_eq!(loaded.train.ids()[0], "m0");
    assert_eq!(loaded.train.n_features(), 1024);

    // m1 has no SR-MMP label
    let m1 = loaded.train.ids().iter().position(|id| id == "m1").unwrap();
    assert_eq!(loaded.train.w()[[m1, 1]], 0.0);
    assert_eq!(loaded.train.y()[[m1, 1]], 0.0);
    assert!(loaded.train.w()[[m1, 0]] > 0.0);

    assert!(matches!(
        loaded.transformers.as_slice(),
        [Transformer::Balancing { .. }]
    ));
}

#[test]
fn load_gzipped_graph_features() {
    let dir = tempfile::tempdir().unwrap();
    let file = fs::File::create(dir.path().join("sider.csv.gz")).unwrap();
    let mut enc = GzEncoder::new(file, Compression::default());
    enc.write_all(CSV.as_bytes()).unwrap();
    enc.finish().unwrap();

    let loaded = DatasetLoader::new(dir.path())
        .with_splitter(Splitter::Random { seed: 123 })
        .load(DatasetName::Sider, FeaturizerKind::GraphConv)
        .unwrap();

    let total = loaded.train.len() + loaded.valid.len() + loaded.test.len();
    assert_eq!(total, 10);
    match loaded.train.x() {
        Features::Graph(graphs) => {
            assert!(graphs.iter().all(|g| g.n_features() == GRAPH_ATOM_FEATURES));
        }
        Features::Dense(_) => panic!("expected graph features"),
    }
}

#[test]
fn cache_is_reused_on_second_load() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(dir.path(), "muv");
    let cache_dir = dir.path().join("cache");
    let loader = DatasetLoader::new(dir.path()).with_cache(FeatureCache::new(&cache_dir));

    let first = loader.load(DatasetName::Muv, FeaturizerKind::Ecfp).unwrap();
    let files: Vec<_> = fs::read_dir(&cache_dir).unwrap().collect();
    assert_eq!(files.len(), 1);

    let second = loader.load(DatasetName::Muv, FeaturizerKind::Ecfp).unwrap();
    assert_eq!(first.train, second.train);
    assert_eq!(first.valid, second.valid);
}

#[test]
fn missing_smiles_column_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pcba.csv"), "id,task\n1,0\n").unwrap();
    let err = DatasetLoader::new(dir.path())
        .load(DatasetName::Pcba, FeaturizerKind::Ecfp)
        .unwrap_err();
    assert!(err.is_config());
}
