use std::path::PathBuf;

use thiserror::Error;

/// Bad configuration: an unsupported plant name or a malformed environment value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported plant '{0}', use 'potato' or 'tomato'")]
    UnsupportedPlant(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("image data is empty")]
    Empty,

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Reasons an upload is rejected before it reaches the model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("image is {width}x{height}, both sides must be at least {min}px")]
    TooSmall { width: u32, height: u32, min: u32 },

    #[error("image is {width}x{height}, both sides must be at most {max}px")]
    TooBig { width: u32, height: u32, max: u32 },

    #[error("image data could not be decoded")]
    Undecodable,
}

/// Checkpoint could not be turned into a usable model. Always recovered by
/// falling back to an untrained backbone.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("checkpoint not found at {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid checkpoint metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("tensorflow: {0}")]
    Graph(#[from] tensorflow::Status),

    #[error("checkpoint head has {found} outputs, expected {expected}")]
    HeadMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("model not loaded")]
    NotLoaded,

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("forward pass failed: {0}")]
    Forward(#[from] tensorflow::Status),

    #[error("model produced {found} outputs, expected {expected}")]
    OutputMismatch { expected: usize, found: usize },

    #[error("model produced non-finite outputs: {0:?}")]
    NonFinite(Vec<f32>),

    #[error("prediction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("model not loaded")]
    NotLoaded,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GITHUB_TOKEN header value")]
    InvalidToken,
}
