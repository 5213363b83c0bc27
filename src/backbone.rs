//! Forward-pass implementations behind the [`Backbone`] trait.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensorflow::{Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor};
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, CheckpointMeta};
use crate::error::{ModelLoadError, PredictionError};
use crate::transform::{InputTensor, TensorLayout, INPUT_SIZE};

/// Maps one canonical input tensor to raw class logits.
///
/// Implementations only read their parameters, so a single instance is shared
/// by all concurrent predictions.
pub trait Backbone: Send + Sync {
    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, PredictionError>;

    /// False for heads that were never trained on plant data.
    fn is_trained(&self) -> bool;

    fn architecture(&self) -> &str;
}

/// A frozen TensorFlow graph with named input and output operations.
pub struct FrozenGraph {
    session: Session,
    graph: Graph,
    input_op: String,
    output_op: String,
    layout: TensorLayout,
    architecture: String,
}

impl FrozenGraph {
    pub fn import(graph_def: &[u8], meta: &CheckpointMeta) -> Result<Self, ModelLoadError> {
        let mut graph = Graph::new();
        graph.import_graph_def(graph_def, &ImportGraphDefOptions::new())?;

        // Fail at load time rather than on the first request.
        graph.operation_by_name_required(&meta.input_op)?;
        graph.operation_by_name_required(&meta.output_op)?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        Ok(FrozenGraph {
            session,
            graph,
            input_op: meta.input_op.clone(),
            output_op: meta.output_op.clone(),
            layout: meta.layout,
            architecture: meta.architecture.clone(),
        })
    }

    fn run(&self, input: &InputTensor) -> Result<Vec<f32>, tensorflow::Status> {
        let input_operation = self.graph.operation_by_name_required(&self.input_op)?;
        let output_operation = self.graph.operation_by_name_required(&self.output_op)?;

        let mut input_tensor = Tensor::new(&input.dims(self.layout));
        input_tensor.copy_from_slice(&input.to_layout(self.layout));

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &input_tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        self.session.run(&mut args)?;

        let output_tensor: Tensor<f32> = args.fetch(output_token)?;
        Ok(output_tensor.to_vec())
    }

    /// Output width for a blank canonical input.
    pub fn probe(&self) -> Result<usize, tensorflow::Status> {
        Ok(self.run(&InputTensor::zeros(INPUT_SIZE))?.len())
    }
}

impl Backbone for FrozenGraph {
    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, PredictionError> {
        Ok(self.run(input)?)
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }
}

/// Fully connected layer with uniformly initialized parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearHead {
    weights: Vec<f32>,
    bias: Vec<f32>,
    inputs: usize,
    outputs: usize,
}

impl LinearHead {
    /// Draws weights and bias from `U(-1/sqrt(inputs), 1/sqrt(inputs))`.
    pub fn seeded(inputs: usize, outputs: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias = (0..outputs).map(|_| rng.gen_range(-bound..bound)).collect();

        Self {
            weights,
            bias,
            inputs,
            outputs,
        }
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn apply(&self, features: &[f32]) -> Result<Vec<f32>, PredictionError> {
        if features.len() != self.inputs {
            return Err(PredictionError::OutputMismatch {
                expected: self.inputs,
                found: features.len(),
            });
        }

        Ok(self
            .weights
            .chunks_exact(self.inputs)
            .zip(&self.bias)
            .map(|(row, bias)| {
                bias + row
                    .iter()
                    .zip(features)
                    .map(|(w, x)| w * x)
                    .sum::<f32>()
            })
            .collect())
    }
}

enum Features {
    /// ImageNet feature extractor graph producing pooled embeddings.
    Pretrained { graph: FrozenGraph, width: usize },
    /// Per-channel mean and standard deviation of the input.
    PooledStats,
}

const POOLED_STATS_WIDTH: usize = 6;
const POOLED_STATS_ARCHITECTURE: &str = "pooled-rgb-statistics";

fn pooled_stats(input: &InputTensor) -> Vec<f32> {
    let data = input.nhwc();
    let pixels = (data.len() / 3).max(1) as f32;

    let mut mean = [0.0f32; 3];
    for pixel in data.chunks_exact(3) {
        for c in 0..3 {
            mean[c] += pixel[c];
        }
    }
    mean.iter_mut().for_each(|m| *m /= pixels);

    let mut var = [0.0f32; 3];
    for pixel in data.chunks_exact(3) {
        for c in 0..3 {
            var[c] += (pixel[c] - mean[c]).powi(2);
        }
    }

    let mut features = mean.to_vec();
    features.extend(var.iter().map(|v| (v / pixels).sqrt()));
    features
}

/// The degraded model used when no usable checkpoint exists: an optional
/// ImageNet feature extractor topped by a randomly initialized head.
pub struct UntrainedBackbone {
    features: Features,
    head: LinearHead,
}

impl UntrainedBackbone {
    pub fn new(num_classes: usize, base_model: Option<&Path>, seed: u64) -> Self {
        let features = match base_model.map(Self::load_base) {
            Some(Ok((graph, width))) => Features::Pretrained { graph, width },
            Some(Err(e)) => {
                warn!("Base model unavailable ({}), using pooled image statistics", e);
                Features::PooledStats
            }
            None => Features::PooledStats,
        };

        let width = match &features {
            Features::Pretrained { width, .. } => *width,
            Features::PooledStats => POOLED_STATS_WIDTH,
        };

        Self {
            features,
            head: LinearHead::seeded(width, num_classes, seed),
        }
    }

    fn load_base(path: &Path) -> Result<(FrozenGraph, usize), ModelLoadError> {
        let checkpoint = Checkpoint::read(path)?;
        let graph = FrozenGraph::import(&checkpoint.graph_def, &checkpoint.meta)?;
        let width = graph.probe()?;
        info!("Loaded ImageNet base model from {:?} ({} features)", path, width);
        Ok((graph, width))
    }

    pub fn num_classes(&self) -> usize {
        self.head.outputs()
    }
}

impl Backbone for UntrainedBackbone {
    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, PredictionError> {
        let features = match &self.features {
            Features::Pretrained { graph, width } => {
                let features = graph.forward(input)?;
                if features.len() != *width {
                    return Err(PredictionError::OutputMismatch {
                        expected: *width,
                        found: features.len(),
                    });
                }
                features
            }
            Features::PooledStats => pooled_stats(input),
        };

        self.head.apply(&features)
    }

    fn is_trained(&self) -> bool {
        false
    }

    /// The feature extractor under the head.
    fn architecture(&self) -> &str {
        match &self.features {
            Features::Pretrained { graph, .. } => graph.architecture(),
            Features::PooledStats => POOLED_STATS_ARCHITECTURE,
        }
    }
}
