//! HTTP prediction service.
//!
//! Loads a [`Predictor`] once at startup and serves it read-only to every
//! request.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness, plus whether the model file exists |
//! | `POST` | `/predict` | Classify `{"id": ...}` or `{"text": ...}` |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "id not found: es-1999" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embedding_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{BackendKind, Provenance};
use crate::error::PredictError;
use crate::models::Prediction;
use crate::predict::{PredictQuery, Predictor};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    predictor: Arc<Predictor>,
    model_path: PathBuf,
    top_k: usize,
}

impl AppState {
    pub fn new(predictor: Arc<Predictor>, top_k: usize) -> Self {
        let model_path = predictor.model_path().to_path_buf();
        Self {
            predictor,
            model_path,
            top_k,
        }
    }
}

/// Build the service's router. Exposed so tests can drive it without a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/predict", post(handle_predict))
        .layer(cors)
        .with_state(state)
}

/// Starts the prediction server.
///
/// Loads the model, catalog and embedding backend, then binds to
/// `[server].bind`. A model or backend that fails to load aborts startup.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let owned = config.clone();
    let predictor = tokio::task::spawn_blocking(move || Predictor::load(&owned)).await??;
    let state = AppState::new(Arc::new(predictor), config.prediction.top_k_service);

    let bind_addr = config.server.bind.clone();
    let app = router(state);

    println!("Prediction server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

impl From<PredictError> for AppError {
    fn from(err: PredictError) -> Self {
        let message = err.to_string();
        match err {
            PredictError::MissingInput => app_error(StatusCode::BAD_REQUEST, "bad_request", message),
            PredictError::NotFound(_) => app_error(StatusCode::NOT_FOUND, "not_found", message),
            PredictError::Embedding(_) => app_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "embedding_unavailable",
                message,
            ),
            PredictError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "prediction failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// Whether the model file is present on disk right now.
    model_loaded: bool,
    backend: BackendKind,
    provenance: Provenance,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: state.model_path.exists(),
        backend: state.predictor.backend_kind(),
        provenance: state.predictor.provenance(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /predict ============

/// Handler for `POST /predict`.
///
/// A body that is not a JSON object of optional strings is a `bad_request`.
///
/// Embedding is CPU-bound (and for the dense encoder, heavy), so it runs on
/// the blocking pool.
async fn handle_predict(
    State(state): State<AppState>,
    body: Result<Json<PredictQuery>, JsonRejection>,
) -> Result<Json<Prediction>, AppError> {
    let Json(query) =
        body.map_err(|rejection| app_error(StatusCode::BAD_REQUEST, "bad_request", rejection.body_text()))?;
    let predictor = state.predictor.clone();
    let top_k = state.top_k;
    let prediction = tokio::task::spawn_blocking(move || predictor.predict(&query, top_k))
        .await
        .map_err(|e| {
            app_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                format!("prediction task failed: {}", e),
            )
        })??;
    Ok(Json(prediction))
}
