use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backbone::{Backbone, FrozenGraph, UntrainedBackbone};
use crate::checkpoint::Checkpoint;
use crate::error::{ModelLoadError, PredictionError, SwitchError};
use crate::plant::{Plant, Verdict, Vocabulary};
use crate::transform::{self, InputTensor};

pub const SUPPORTED_FORMATS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub prediction: Verdict,
    pub confidence: f32,
    pub plant_type: Plant,
    pub disease_type: Option<String>,
    pub predicted_class: String,
    #[serde(skip)]
    pub class_index: usize,
    pub all_probabilities: Vec<f32>,
}

/// Options that shape how any model is built, independent of the plant.
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    /// ImageNet feature extractor used under the untrained fallback head.
    pub base_model_path: Option<PathBuf>,
    /// Swap the two probability columns of tomato checkpoints.
    pub invert_tomato_labels: bool,
    pub fallback_seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Checkpoint(PathBuf),
    Fallback,
}

/// Everything a prediction reads, replaced as one unit on a plant switch.
pub struct ActiveModel {
    backbone: Box<dyn Backbone>,
    vocabulary: Vocabulary,
    val_accuracy: Option<f64>,
    invert_labels: bool,
    source: ModelSource,
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl ActiveModel {
    pub fn new(
        backbone: Box<dyn Backbone>,
        vocabulary: Vocabulary,
        val_accuracy: Option<f64>,
        invert_tomato_labels: bool,
        source: ModelSource,
    ) -> Self {
        let invert_labels = invert_tomato_labels && vocabulary.plant() == Plant::Tomato;
        Self {
            backbone,
            vocabulary,
            val_accuracy,
            invert_labels,
            source,
        }
    }

    /// Loads `checkpoint` for `plant`. Never fails: without a checkpoint, or
    /// when it cannot be used, the result is an untrained model of the same
    /// shape.
    pub fn load(plant: Plant, checkpoint: Option<&Path>, settings: &ModelSettings) -> Self {
        let Some(path) = checkpoint else {
            info!("No checkpoint given for {}, building an untrained head", plant);
            return Self::fallback(plant, settings);
        };

        match Self::try_load(plant, path, settings) {
            Ok(model) => {
                info!(
                    "Loaded trained {} model from {:?} (classes: {:?})",
                    plant,
                    path,
                    model.vocabulary.names()
                );
                model
            }
            Err(ModelLoadError::Missing(path)) => {
                warn!(
                    "Model file not found at {:?}, using untrained {} model",
                    path, plant
                );
                Self::fallback(plant, settings)
            }
            Err(e) => {
                error!("Error loading {} model: {}", plant, e);
                Self::fallback(plant, settings)
            }
        }
    }

    pub fn try_load(
        plant: Plant,
        path: &Path,
        settings: &ModelSettings,
    ) -> Result<Self, ModelLoadError> {
        let checkpoint = Checkpoint::read(path)?;
        let vocabulary =
            Vocabulary::from_checkpoint(plant, checkpoint.meta.class_names.as_deref());

        let graph = FrozenGraph::import(&checkpoint.graph_def, &checkpoint.meta)?;
        let outputs = graph.probe()?;
        if outputs != vocabulary.len() {
            return Err(ModelLoadError::HeadMismatch {
                expected: vocabulary.len(),
                found: outputs,
            });
        }

        Ok(Self::new(
            Box::new(graph),
            vocabulary,
            checkpoint.meta.val_acc,
            settings.invert_tomato_labels,
            ModelSource::Checkpoint(checkpoint.path),
        ))
    }

    pub fn fallback(plant: Plant, settings: &ModelSettings) -> Self {
        let vocabulary = Vocabulary::for_plant(plant);
        let backbone = UntrainedBackbone::new(
            vocabulary.len(),
            settings.base_model_path.as_deref(),
            settings.fallback_seed,
        );

        Self::new(
            Box::new(backbone),
            vocabulary,
            None,
            settings.invert_tomato_labels,
            ModelSource::Fallback,
        )
    }

    pub fn plant(&self) -> Plant {
        self.vocabulary.plant()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn class_names(&self) -> Vec<String> {
        self.vocabulary.names()
    }

    pub fn val_accuracy(&self) -> Option<f64> {
        self.val_accuracy
    }

    pub fn is_trained(&self) -> bool {
        self.backbone.is_trained()
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn architecture(&self) -> &str {
        self.backbone.architecture()
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Prediction, PredictionError> {
        let input = transform::canonical(image)?;
        self.predict_tensor(&input)
    }

    pub fn predict_tensor(&self, input: &InputTensor) -> Result<Prediction, PredictionError> {
        let logits = self.backbone.forward(input)?;
        if logits.len() != self.vocabulary.len() {
            return Err(PredictionError::OutputMismatch {
                expected: self.vocabulary.len(),
                found: logits.len(),
            });
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(PredictionError::NonFinite(logits));
        }

        let mut probabilities = softmax(&logits);
        if self.invert_labels {
            probabilities.reverse();
        }

        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });
        let label = self
            .vocabulary
            .get(class_index)
            .ok_or(PredictionError::OutputMismatch {
                expected: self.vocabulary.len(),
                found: class_index + 1,
            })?;

        debug!(
            "Predicted {} ({:.4}) probabilities {:?}",
            label.name, confidence, probabilities
        );

        Ok(Prediction {
            prediction: label.verdict,
            confidence,
            plant_type: label.plant,
            disease_type: label.disease_type().map(str::to_string),
            predicted_class: label.name.clone(),
            class_index,
            all_probabilities: probabilities,
        })
    }
}

/// Owns the single active model. Predictions share it through an `Arc`;
/// loads and switches are serialized and publish a fully built model in one
/// swap.
pub struct ModelManager {
    settings: ModelSettings,
    active: RwLock<Option<Arc<ActiveModel>>>,
    writer: Mutex<()>,
}

impl ModelManager {
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            settings,
            active: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Builds the model off the async executor.
    async fn build(&self, plant: Plant, checkpoint: Option<PathBuf>) -> ActiveModel {
        let settings = self.settings.clone();
        let fallback_settings = settings.clone();
        tokio::task::spawn_blocking(move || {
            ActiveModel::load(plant, checkpoint.as_deref(), &settings)
        })
        .await
        .unwrap_or_else(|e| {
            error!("Model load task failed: {}", e);
            ActiveModel::fallback(plant, &fallback_settings)
        })
    }

    async fn publish(&self, model: ActiveModel) -> Arc<ActiveModel> {
        let model = Arc::new(model);
        *self.active.write().await = Some(model.clone());
        model
    }

    pub async fn load(&self, checkpoint: Option<PathBuf>, plant: Plant) -> Arc<ActiveModel> {
        let _writer = self.writer.lock().await;
        let model = self.build(plant, checkpoint).await;
        self.publish(model).await
    }

    /// Switches to `plant`. Without a checkpoint the new head is untrained.
    /// Unsupported plants leave the active model untouched.
    pub async fn switch_plant(
        &self,
        plant: &str,
        checkpoint: Option<PathBuf>,
    ) -> Result<Arc<ActiveModel>, SwitchError> {
        let plant: Plant = plant.parse()?;

        let _writer = self.writer.lock().await;
        let previous = self.active().await.ok_or(SwitchError::NotLoaded)?;

        info!("Switching model from {} to {}", previous.plant(), plant);
        let model = self.build(plant, checkpoint).await;
        Ok(self.publish(model).await)
    }

    pub async fn active(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().await.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Classifies `image` with the model active at call time, returning that
    /// model alongside its prediction. The forward pass runs off the executor.
    pub async fn predict(
        &self,
        image: RgbImage,
    ) -> Result<(Arc<ActiveModel>, Prediction), PredictionError> {
        let model = self.active().await.ok_or(PredictionError::NotLoaded)?;

        let snapshot = model.clone();
        let prediction = tokio::task::spawn_blocking(move || snapshot.predict(&image))
            .await
            .map_err(|e| PredictionError::Task(e.to_string()))??;

        Ok((model, prediction))
    }
}
