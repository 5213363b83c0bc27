//! HTTP surface: prediction, plant switching, health, model info and metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, MatchedPath, Multipart, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{ConfigError, ImageDecodeError, PredictionError, SwitchError, ValidationError};
use crate::metrics::Metrics;
use crate::model::{ModelManager, Prediction, SUPPORTED_FORMATS};
use crate::plant::Plant;
use crate::preprocessing;
use crate::transform::INPUT_SIZE;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(manager: Arc<ModelManager>, settings: Settings, metrics: Arc<Metrics>) -> Self {
        Self {
            manager,
            settings: Arc::new(settings),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit_bytes = state.settings.body_limit_bytes;

    Router::new()
        .route("/predict", post(predict_handler))
        .route("/model/switch", post(switch_model_handler))
        .route("/model/info", get(model_info_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Counts every routed request by its route template and response status.
async fn track_requests<B>(
    State(state): State<AppState>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;
    state
        .metrics
        .observe_request(&route, response.status().as_u16());
    response
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = json!({ "error": self.kind(), "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(format!("Invalid image: {}", e))
    }
}

impl From<ImageDecodeError> for ApiError {
    fn from(e: ImageDecodeError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<PredictionError> for ApiError {
    fn from(e: PredictionError) -> Self {
        match e {
            PredictionError::NotLoaded => ApiError::ServiceUnavailable("Model not loaded".into()),
            e => ApiError::Internal(format!("Internal server error: {}", e)),
        }
    }
}

impl From<SwitchError> for ApiError {
    fn from(e: SwitchError) -> Self {
        match e {
            SwitchError::Config(e) => e.into(),
            SwitchError::NotLoaded => ApiError::ServiceUnavailable("Model not loaded".into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub model_accuracy: Option<f64>,
    pub model_version: &'static str,
}

struct Upload {
    content_type: Option<String>,
    bytes: Bytes,
}

/// Takes the first `file` (or `image`) field of the form.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        ApiError::BadRequest(format!("Malformed upload: {}", e))
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if matches!(field.name(), Some("file") | Some("image")) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(malformed)?;
            return Ok(Upload {
                content_type,
                bytes,
            });
        }
    }

    Err(ApiError::BadRequest("No file uploaded".into()))
}

async fn predict_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let upload = read_upload(&mut multipart).await?;

    let is_image = upload
        .content_type
        .as_deref()
        .map_or(false, |ct| ct.starts_with("image/"));
    if !is_image {
        return Err(ApiError::BadRequest("File must be an image".into()));
    }

    let info = preprocessing::check(&upload.bytes)?;
    debug!(
        "Upload accepted: {}x{} {:?} ({} bytes)",
        info.width, info.height, info.format, info.size_bytes
    );
    let pixels = preprocessing::preprocess(&upload.bytes)?;

    let started = Instant::now();
    let (model, prediction) = state.manager.predict(pixels).await?;
    state.metrics.observe_prediction(&prediction, started.elapsed());

    info!(
        "Prediction: {} ({}, confidence {:.3})",
        prediction.predicted_class,
        prediction.plant_type,
        prediction.confidence
    );

    Ok(Json(PredictResponse {
        prediction,
        model_accuracy: model.val_accuracy(),
        model_version: VERSION,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub plant: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchResponse {
    pub success: bool,
    pub active_plant: Plant,
    pub classes: Vec<String>,
}

async fn switch_model_handler(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<SwitchResponse>, ApiError> {
    let plant: Plant = request.plant.parse()?;
    let checkpoint = state.settings.checkpoint_for(plant);

    let model = state
        .manager
        .switch_plant(&request.plant, Some(checkpoint))
        .await?;
    state.metrics.observe_switch(model.plant());

    Ok(Json(SwitchResponse {
        success: true,
        active_plant: model.plant(),
        classes: model.class_names(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub version: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.manager.is_loaded().await,
        version: VERSION,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_name: &'static str,
    pub version: &'static str,
    pub architecture: String,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    pub input_size: [u32; 2],
    pub supported_formats: Vec<&'static str>,
    pub active_plant: Plant,
    pub trained: bool,
}

async fn model_info_handler(State(state): State<AppState>) -> Result<Json<ModelInfo>, ApiError> {
    let model = state
        .manager
        .active()
        .await
        .ok_or(PredictionError::NotLoaded)?;

    Ok(Json(ModelInfo {
        model_name: "Plant Disease Classifier",
        version: VERSION,
        architecture: model.architecture().to_string(),
        num_classes: model.vocabulary().len(),
        class_names: model.class_names(),
        input_size: [INPUT_SIZE, INPUT_SIZE],
        supported_formats: SUPPORTED_FORMATS.to_vec(),
        active_plant: model.plant(),
        trained: model.is_trained(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let (content_type, body) = state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(format!("Failed to render metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
