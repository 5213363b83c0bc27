//! Checkpoint artifacts: a frozen graph plus an optional JSON sidecar.
//!
//! `models/potato_model_best.pb` is described by `models/potato_model_best.json`:
//!
//! ```json
//! {"class_names": ["diseased_potato", "healthy_potato"], "val_acc": 97.4}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ModelLoadError;
use crate::transform::TensorLayout;

fn default_input_op() -> String {
    "x".to_string()
}

fn default_output_op() -> String {
    "Identity".to_string()
}

fn default_architecture() -> String {
    "EfficientNet-B0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
    /// Validation accuracy in percent.
    #[serde(default)]
    pub val_acc: Option<f64>,
    #[serde(default = "default_input_op")]
    pub input_op: String,
    #[serde(default = "default_output_op")]
    pub output_op: String,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default = "default_architecture")]
    pub architecture: String,
}

impl Default for CheckpointMeta {
    fn default() -> Self {
        Self {
            class_names: None,
            val_acc: None,
            input_op: default_input_op(),
            output_op: default_output_op(),
            layout: TensorLayout::default(),
            architecture: default_architecture(),
        }
    }
}

impl CheckpointMeta {
    pub fn sidecar_path(graph_path: &Path) -> PathBuf {
        graph_path.with_extension("json")
    }

    /// Reads the sidecar next to `graph_path`, or defaults when there is none.
    pub fn read_for(graph_path: &Path) -> Result<Self, ModelLoadError> {
        let path = Self::sidecar_path(graph_path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).map_err(|source| ModelLoadError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ModelLoadError::Metadata { path, source })
    }
}

pub struct Checkpoint {
    pub path: PathBuf,
    pub graph_def: Vec<u8>,
    pub meta: CheckpointMeta,
}

impl Checkpoint {
    pub fn read(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::Missing(path.to_path_buf()));
        }

        let graph_def = fs::read(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let meta = CheckpointMeta::read_for(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            graph_def,
            meta,
        })
    }
}
