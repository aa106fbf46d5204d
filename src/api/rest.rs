//! Axum REST API handlers

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::BatchInput;
use crate::error::InferenceError;
use crate::service::ClassifierService;

use super::dto::*;

/// Batch body limit, in multiples of the single-file limit
const BATCH_BODY_MULTIPLIER: usize = 32;

/// Room for multipart headers and boundaries on top of the file bytes
const MULTIPART_OVERHEAD: usize = 64 * 1024;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<ClassifierService>,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>) -> Router {
    let (single_limit, batch_limit) = body_limits(state.service.policy().max_file_size());

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(
            "/predict",
            post(predict_handler).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/predict_batch",
            post(predict_batch_handler).layer(DefaultBodyLimit::max(batch_limit)),
        )
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body limits for `/predict` and `/predict_batch`
fn body_limits(max_file_size: usize) -> (usize, usize) {
    let single = max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let batch = max_file_size
        .saturating_mul(BATCH_BODY_MULTIPLIER)
        .saturating_add(MULTIPART_OVERHEAD);
    (single, batch)
}

/// Map a pipeline error onto an HTTP status and error body
fn inference_error(e: InferenceError) -> ApiError {
    let (status, code) = match &e {
        InferenceError::ModelNotReady => (StatusCode::SERVICE_UNAVAILABLE, "MODEL_NOT_READY"),
        InferenceError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
        InferenceError::InvalidInput { .. } | InferenceError::InvalidImage(_) => {
            (StatusCode::BAD_REQUEST, "INVALID_INPUT")
        }
        InferenceError::ModelLoad { .. }
        | InferenceError::Inference { .. }
        | InferenceError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PREDICTION_FAILED"),
    };

    if status.is_server_error() {
        error!("Prediction failed: {}", e);
    } else {
        warn!("Rejected upload: {}", e);
    }

    (status, Json(ErrorResponse::new(&e.to_string(), code)))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    (e.status(), Json(ErrorResponse::new(&e.body_text(), "MULTIPART_ERROR")))
}

/// Read one multipart file field into a batch input
async fn read_upload(field: Field<'_>) -> Result<BatchInput, ApiError> {
    let filename = field.file_name().unwrap_or("").to_string();
    let content_type = field.content_type().unwrap_or("").to_string();
    let data = field.bytes().await.map_err(multipart_error)?.to_vec();

    Ok(BatchInput {
        filename,
        data,
        content_type,
    })
}

/// Service banner
async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Resnet18 Image Classification API is running".to_string(),
    })
}

/// Health check
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health();

    Json(HealthResponse {
        status: health.status,
        model_loaded: health.model_loaded,
        num_classes: health.num_classes,
    })
}

/// Classify a single image (multipart field `file`)
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let mut upload: Option<BatchInput> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            upload = Some(read_upload(field).await?);
        }
    }

    let upload = upload.ok_or_else(|| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Missing file field", "MISSING_FILE")))
    })?;

    let prediction = state
        .service
        .predict_one(upload.data, &upload.content_type, &upload.filename)
        .await
        .map_err(inference_error)?;

    info!(
        "{} -> {:?} ({:.3})",
        upload.filename, prediction.predicted_class_name, prediction.confidence
    );

    Ok(Json(PredictResponse {
        success: true,
        filename: upload.filename,
        prediction,
    }))
}

/// Classify several images (repeated multipart field `files`)
async fn predict_batch_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("files") {
            files.push(read_upload(field).await?);
        }
    }

    if files.is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Missing files field", "MISSING_FILES"))));
    }

    let batch = state.service.predict_many(files).await.map_err(inference_error)?;
    info!("Batch: {}/{} files classified", batch.success_count(), batch.total_files);

    Ok(Json(BatchResponse::from(batch)))
}
