//! Graph convolution classifier over molecular graphs.
//!
//! Two convolution blocks (self term plus summed neighbor term, ReLU, then a
//! max-pool over each atom's neighborhood), a dense ReLU layer per atom, a
//! sum-gather into one vector per molecule followed by `tanh`, and a sigmoid
//! output per task.

use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use molbench_checkpoint::{CheckpointError, ModelState};
use molbench_core::{GraphConvParams, MolbenchError, Result};
use molbench_data::{Dataset, MolGraph};

use crate::layers::{
    check_shape, relu, relu_backward, sigmoid, weighted_sigmoid_cross_entropy, Dense,
};
use crate::model::{shuffled_batches, Network};
use crate::optim::Adam;

/// Atoms of several molecules stacked into one block-diagonal graph.
#[derive(Debug, Clone)]
struct GraphBatch {
    x: Array2<f32>,
    adjacency: Vec<Vec<usize>>,
    /// Atom row range of each molecule.
    ranges: Vec<(usize, usize)>,
}

impl GraphBatch {
    fn new(graphs: &[MolGraph], indices: &[usize], n_features: usize) -> Result<Self> {
        let total: usize = indices.iter().map(|&i| graphs[i].n_atoms()).sum();
        let mut x = Array2::zeros((total, n_features));
        let mut adjacency = Vec::with_capacity(total);
        let mut ranges = Vec::with_capacity(indices.len());
        let mut start = 0;
        for &i in indices {
            let g = &graphs[i];
            let n = g.n_atoms();
            if n > 0 {
                if g.n_features() != n_features {
                    return Err(MolbenchError::config(format!(
                        "graph {i} has {} atom features, model expects {n_features}",
                        g.n_features()
                    )));
                }
                x.slice_mut(s![start..start + n, ..]).assign(&g.atom_features);
            }
            for neighbors in &g.adjacency {
                if let Some(&bad) = neighbors.iter().find(|&&j| j >= n) {
                    return Err(MolbenchError::config(format!(
                        "graph {i} links to atom {bad} but has {n} atoms"
                    )));
                }
                adjacency.push(neighbors.iter().map(|&j| j + start).collect());
            }
            ranges.push((start, start + n));
            start += n;
        }
        Ok(Self {
            x,
            adjacency,
            ranges,
        })
    }
}

fn neighbor_sum(adjacency: &[Vec<usize>], h: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(h.dim());
    for (i, neighbors) in adjacency.iter().enumerate() {
        let mut row = out.row_mut(i);
        for &j in neighbors {
            row += &h.row(j);
        }
    }
    out
}

fn neighbor_sum_backward(adjacency: &[Vec<usize>], grad: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(grad.dim());
    for (i, neighbors) in adjacency.iter().enumerate() {
        for &j in neighbors {
            let mut row = out.row_mut(j);
            row += &grad.row(i);
        }
    }
    out
}

/// Elementwise max over each atom and its neighbors, with the winning row.
fn max_pool(adjacency: &[Vec<usize>], h: &Array2<f32>) -> (Array2<f32>, Array2<usize>) {
    let mut out = h.clone();
    let mut arg = Array2::from_shape_fn(h.dim(), |(i, _)| i);
    for (i, neighbors) in adjacency.iter().enumerate() {
        for &j in neighbors {
            for f in 0..h.ncols() {
                if h[[j, f]] > out[[i, f]] {
                    out[[i, f]] = h[[j, f]];
                    arg[[i, f]] = j;
                }
            }
        }
    }
    (out, arg)
}

fn max_pool_backward(arg: &Array2<usize>, grad: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(grad.dim());
    for ((i, f), &g) in grad.indexed_iter() {
        out[[arg[[i, f]], f]] += g;
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
struct GraphConvLayer {
    self_term: Dense,
    neighbor_term: Dense,
}

struct ConvCache {
    input: Array2<f32>,
    neighbors: Array2<f32>,
    pre: Array2<f32>,
}

impl GraphConvLayer {
    fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self {
            self_term: Dense::glorot(in_features, out_features, rng),
            neighbor_term: Dense::glorot(in_features, out_features, rng),
        }
    }

    fn forward(&self, adjacency: &[Vec<usize>], input: Array2<f32>) -> ConvCache {
        let neighbors = neighbor_sum(adjacency, &input);
        let pre = self.self_term.forward(&input) + self.neighbor_term.forward(&neighbors);
        ConvCache {
            input,
            neighbors,
            pre,
        }
    }

    fn backward(
        &mut self,
        name: &str,
        adjacency: &[Vec<usize>],
        cache: &ConvCache,
        grad_pre: &Array2<f32>,
        optimizer: &mut Adam,
    ) -> Array2<f32> {
        let (grad_self, self_grad) = self.self_term.backward(&cache.input, grad_pre);
        let (grad_neighbors, neighbor_grad) =
            self.neighbor_term.backward(&cache.neighbors, grad_pre);
        self.self_term
            .apply(&format!("{name}.self"), &self_grad, 0.0, optimizer);
        self.neighbor_term
            .apply(&format!("{name}.neighbor"), &neighbor_grad, 0.0, optimizer);
        grad_self + neighbor_sum_backward(adjacency, &grad_neighbors)
    }

    fn save(&self, name: &str, state: &mut ModelState) {
        self.self_term.save(&format!("{name}.self"), state);
        self.neighbor_term.save(&format!("{name}.neighbor"), state);
    }

    fn load(&self, name: &str, state: &ModelState) -> std::result::Result<Self, CheckpointError> {
        let self_term = Dense::load(&format!("{name}.self"), state)?;
        let neighbor_term = Dense::load(&format!("{name}.neighbor"), state)?;
        check_shape(&format!("{name}.self"), &self.self_term, &self_term)?;
        check_shape(&format!("{name}.neighbor"), &self.neighbor_term, &neighbor_term)?;
        Ok(Self {
            self_term,
            neighbor_term,
        })
    }
}

struct Trace {
    conv1: ConvCache,
    pool1_arg: Array2<usize>,
    conv2: ConvCache,
    pool2_arg: Array2<usize>,
    pooled: Array2<f32>,
    dense_pre: Array2<f32>,
    gathered: Array2<f32>,
    logits: Array2<f32>,
}

/// Graph convolution network.
pub struct GraphConvModel {
    params: GraphConvParams,
    n_features: usize,
    conv1: GraphConvLayer,
    conv2: GraphConvLayer,
    dense: Dense,
    head: Dense,
    optimizer: Adam,
}

impl GraphConvModel {
    /// Registry name.
    pub const ARCHITECTURE: &'static str = "graph_conv";

    /// Builds a freshly initialized network over `n_features` atom features.
    pub fn new<R: Rng + ?Sized>(
        n_features: usize,
        n_tasks: usize,
        params: GraphConvParams,
        rng: &mut R,
    ) -> Self {
        let filters = params.n_filters;
        let nodes = params.n_fully_connected_nodes;
        Self {
            n_features,
            conv1: GraphConvLayer::new(n_features, filters, rng),
            conv2: GraphConvLayer::new(filters, filters, rng),
            dense: Dense::glorot(filters, nodes, rng),
            head: Dense::glorot(nodes, n_tasks, rng),
            optimizer: Adam::new(params.learning_rate),
            params,
        }
    }

    fn graphs<'a>(&self, dataset: &'a Dataset) -> Result<&'a [MolGraph]> {
        dataset.graphs().ok_or_else(|| {
            MolbenchError::config(format!(
                "{} needs graph features, got a dense matrix",
                Self::ARCHITECTURE
            ))
        })
    }

    fn forward(&self, batch: &GraphBatch) -> Trace {
        let adjacency = &batch.adjacency;
        let conv1 = self.conv1.forward(adjacency, batch.x.clone());
        let (pool1, pool1_arg) = max_pool(adjacency, &relu(&conv1.pre));
        let conv2 = self.conv2.forward(adjacency, pool1);
        let (pooled, pool2_arg) = max_pool(adjacency, &relu(&conv2.pre));
        let dense_pre = self.dense.forward(&pooled);
        let atoms = relu(&dense_pre);

        let mut gathered = Array2::zeros((batch.ranges.len(), atoms.ncols()));
        for (m, &(start, end)) in batch.ranges.iter().enumerate() {
            gathered
                .row_mut(m)
                .assign(&atoms.slice(s![start..end, ..]).sum_axis(Axis(0)));
        }
        gathered.mapv_inplace(f32::tanh);
        let logits = self.head.forward(&gathered);
        Trace {
            conv1,
            pool1_arg,
            conv2,
            pool2_arg,
            pooled,
            dense_pre,
            gathered,
            logits,
        }
    }

    fn backward(&mut self, batch: &GraphBatch, trace: &Trace, grad_logits: &Array2<f32>) {
        let optimizer = &mut self.optimizer;
        let (grad_gathered, head_grad) = self.head.backward(&trace.gathered, grad_logits);
        self.head.apply("head", &head_grad, 0.0, optimizer);

        let grad_sum = grad_gathered * trace.gathered.mapv(|g| 1.0 - g * g);
        let mut grad_atoms = Array2::zeros(trace.dense_pre.dim());
        for (m, &(start, end)) in batch.ranges.iter().enumerate() {
            grad_atoms
                .slice_mut(s![start..end, ..])
                .assign(&grad_sum.row(m));
        }
        let grad_dense_pre = relu_backward(&trace.dense_pre, grad_atoms);
        let (grad_pooled, dense_grad) = self.dense.backward(&trace.pooled, &grad_dense_pre);
        self.dense.apply("dense", &dense_grad, 0.0, optimizer);

        let adjacency = &batch.adjacency;
        let grad_pre2 = relu_backward(
            &trace.conv2.pre,
            max_pool_backward(&trace.pool2_arg, &grad_pooled),
        );
        let grad_pool1 = self
            .conv2
            .backward("conv2", adjacency, &trace.conv2, &grad_pre2, optimizer);
        let grad_pre1 = relu_backward(
            &trace.conv1.pre,
            max_pool_backward(&trace.pool1_arg, &grad_pool1),
        );
        self.conv1
            .backward("conv1", adjacency, &trace.conv1, &grad_pre1, optimizer);
    }
}

impl Network for GraphConvModel {
    fn architecture(&self) -> &'static str {
        Self::ARCHITECTURE
    }

    fn train_epoch(&mut self, dataset: &Dataset, rng: &mut StdRng) -> Result<f32> {
        let graphs = self.graphs(dataset)?;
        let batches = shuffled_batches(dataset.len(), self.params.batch_size, rng);
        let mut total = 0.0;
        for indices in &batches {
            let batch = GraphBatch::new(graphs, indices, self.n_features)?;
            let yb = dataset.y().select(Axis(0), indices);
            let wb = dataset.w().select(Axis(0), indices);
            let trace = self.forward(&batch);
            let (loss, grad) = weighted_sigmoid_cross_entropy(&trace.logits, &yb, &wb);
            total += loss;
            self.optimizer.begin_step();
            self.backward(&batch, &trace, &grad);
        }
        Ok(total / batches.len().max(1) as f32)
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        let graphs = self.graphs(dataset)?;
        let mut out = Array2::zeros((dataset.len(), self.head.out_features()));
        let indices: Vec<usize> = (0..dataset.len()).collect();
        for chunk in indices.chunks(self.params.batch_size.max(1)) {
            let batch = GraphBatch::new(graphs, chunk, self.n_features)?;
            let probs = self.forward(&batch).logits.mapv(sigmoid);
            out.slice_mut(s![chunk[0]..chunk[0] + chunk.len(), ..])
                .assign(&probs);
        }
        Ok(out)
    }

    fn save_state(&self, state: &mut ModelState) {
        self.conv1.save("conv1", state);
        self.conv2.save("conv2", state);
        self.dense.save("dense", state);
        self.head.save("head", state);
        state.optimizer = Some(self.optimizer.to_state());
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        let conv1 = self.conv1.load("conv1", state)?;
        let conv2 = self.conv2.load("conv2", state)?;
        let dense = Dense::load("dense", state)?;
        check_shape("dense", &self.dense, &dense)?;
        let head = Dense::load("head", state)?;
        check_shape("head", &self.head, &head)?;

        self.conv1 = conv1;
        self.conv2 = conv2;
        self.dense = dense;
        self.head = head;
        if let Some(opt) = &state.optimizer {
            self.optimizer = Adam::from_state(opt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molbench_data::{parse_smiles, Featurizer, GRAPH_ATOM_FEATURES};
    use molbench_core::FeaturizerKind;
    use ndarray::array;
    use rand::SeedableRng;

    fn graph_dataset() -> Dataset {
        let smiles = ["CCO", "c1ccccc1", "CC(=O)O", "CCN", "c1ccncc1", "CCCC"];
        let molecules: Vec<_> = smiles.iter().map(|s| parse_smiles(s).unwrap()).collect();
        let x = Featurizer::from_kind(FeaturizerKind::GraphConv).featurize(&molecules);
        let y = array![[0.0], [1.0], [0.0], [0.0], [1.0], [0.0]];
        let w = Array2::ones((6, 1));
        let ids = smiles.iter().map(|s| s.to_string()).collect();
        Dataset::new(x, y, w, ids, vec!["aromatic".into()]).unwrap()
    }

    fn small_params() -> GraphConvParams {
        GraphConvParams {
            learning_rate: 0.01,
            n_filters: 8,
            n_fully_connected_nodes: 8,
            batch_size: 4,
            nb_epoch: 1,
        }
    }

    #[test]
    fn test_neighbor_sum_and_pool() {
        let adjacency = vec![vec![1], vec![0, 2], vec![1]];
        let h = array![[1.0], [5.0], [2.0]];
        assert_eq!(neighbor_sum(&adjacency, &h), array![[5.0], [3.0], [5.0]]);
        let (pooled, arg) = max_pool(&adjacency, &h);
        assert_eq!(pooled, array![[5.0], [5.0], [5.0]]);
        assert_eq!(arg, array![[1], [1], [1]]);
        let grad = max_pool_backward(&arg, &array![[1.0], [1.0], [1.0]]);
        assert_eq!(grad, array![[0.0], [3.0], [0.0]]);
    }

    #[test]
    fn test_trains_and_predicts_probabilities() {
        let ds = graph_dataset();
        let mut rng = StdRng::seed_from_u64(31);
        let mut net = GraphConvModel::new(GRAPH_ATOM_FEATURES, 1, small_params(), &mut rng);
        let first = net.train_epoch(&ds, &mut rng).unwrap();
        let mut last = first;
        for _ in 0..60 {
            last = net.train_epoch(&ds, &mut rng).unwrap();
        }
        assert!(last < first);
        let p = net.predict(&ds).unwrap();
        assert_eq!(p.dim(), (6, 1));
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_state_roundtrip() {
        let ds = graph_dataset();
        let mut rng = StdRng::seed_from_u64(32);
        let net = GraphConvModel::new(GRAPH_ATOM_FEATURES, 1, small_params(), &mut rng);
        let mut state = ModelState::new("graphconv", 0);
        net.save_state(&mut state);
        let mut fresh = GraphConvModel::new(GRAPH_ATOM_FEATURES, 1, small_params(), &mut rng);
        fresh.load_state(&state).unwrap();
        assert_eq!(fresh.predict(&ds).unwrap(), net.predict(&ds).unwrap());
    }

    #[test]
    fn test_rejects_dense_input() {
        let mut rng = StdRng::seed_from_u64(33);
        let net = GraphConvModel::new(3, 1, small_params(), &mut rng);
        let ds = Dataset::from_dense(Array2::zeros((2, 3)), Array2::zeros((2, 1)), vec!["t".into()])
            .unwrap();
        assert!(net.predict(&ds).unwrap_err().is_config());
    }
}
