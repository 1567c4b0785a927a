use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ValidationError;
use crate::orchestrator::{Orchestrator, StatusReport};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server error: {0}")]
    Server(String),
}

/// Response structure for the service root
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Response structure for the wallet endpoints
#[derive(Debug, Serialize)]
pub struct WalletsResponse {
    pub success: bool,
    pub data: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWalletRequest {
    pub wallet_address: Option<String>,
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(status: StatusCode, error: &str, message: String) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
}

impl From<ValidationError> for (StatusCode, Json<ErrorResponse>) {
    fn from(error: ValidationError) -> Self {
        let (status, code) = match &error {
            ValidationError::MissingAddress => (StatusCode::BAD_REQUEST, "missing_address"),
            ValidationError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "invalid_address"),
            ValidationError::DuplicateAddress(_) => (StatusCode::CONFLICT, "duplicate_address"),
            ValidationError::UnknownAddress(_) => (StatusCode::NOT_FOUND, "unknown_address"),
        };
        error_response(status, code, error.to_string())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the admin router; exposed separately so it can be driven without a socket
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/wallets", get(list_wallets).post(add_wallet))
        .route("/wallets/:address", delete(remove_wallet))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(AppState { orchestrator })
}

/// HTTP admin server
pub struct ApiServer {
    orchestrator: Arc<Orchestrator>,
    pub host: String,
    pub port: u16,
}

impl ApiServer {
    pub fn new(orchestrator: Arc<Orchestrator>, host: &str, port: u16) -> Self {
        Self {
            orchestrator,
            host: host.to_string(),
            port,
        }
    }

    /// Serve until `shutdown` flips to true
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ApiError> {
        let app = router(self.orchestrator.clone());

        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApiError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        log::info!("HTTP API server starting on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| ApiError::Server(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// GET / - Service name and version
pub async fn get_root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// GET /health - Liveness probe
pub async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// GET /status - Pipeline counters, connection state and watermark
pub async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.orchestrator.status())
}

/// GET /wallets - Currently watched addresses
pub async fn list_wallets(State(state): State<AppState>) -> Json<WalletsResponse> {
    Json(wallets_response(&state))
}

/// POST /wallets - Start watching an address
pub async fn add_wallet(
    State(state): State<AppState>,
    payload: Result<Json<AddWalletRequest>, JsonRejection>,
) -> ApiResult<WalletsResponse> {
    let Json(request) = payload.map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, "invalid_body", e.body_text())
    })?;
    let address = request.wallet_address.ok_or(ValidationError::MissingAddress)?;

    let added = state.orchestrator.watch_list().add(&address).map_err(|e| {
        log::warn!("Rejected wallet add: {}", e);
        e
    })?;
    log::info!("Now watching {}", added);

    Ok(Json(wallets_response(&state)))
}

/// DELETE /wallets/:address - Stop watching an address
pub async fn remove_wallet(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<WalletsResponse> {
    let removed = state.orchestrator.watch_list().remove(&address)?;
    log::info!("Stopped watching {}", removed);

    Ok(Json(wallets_response(&state)))
}

fn wallets_response(state: &AppState) -> WalletsResponse {
    let data = state.orchestrator.watch_list().list();
    WalletsResponse {
        success: true,
        count: data.len(),
        data,
    }
}
