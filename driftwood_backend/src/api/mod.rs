mod inbox;

use crate::activitypub::{ActorDirectory, DeliveryLedger, SignatureVerifier, SweepHandle, VerificationError};
use crate::config::DriftwoodConfig;
use crate::database::repositories::{ActorRepository, StatusRepository};
use crate::database::Database;
use anyhow::Result;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: DriftwoodConfig,
    pub database: Database,
    pub ledger: DeliveryLedger,
    pub verifier: Arc<SignatureVerifier>,
    /// Woken after every accepted delivery. Absent when nothing sweeps in-process.
    pub sweeper: Option<SweepHandle>,
}

impl AppState {
    pub fn new(
        config: DriftwoodConfig,
        database: Database,
        directory: ActorDirectory,
        ledger: DeliveryLedger,
        sweeper: Option<SweepHandle>,
    ) -> Self {
        let verifier = SignatureVerifier::new(Arc::new(directory), config.federation.max_clock_skew);
        Self {
            config,
            database,
            ledger,
            verifier: Arc::new(verifier),
            sweeper,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse { message: msg }),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ErrorResponse { message: msg }),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse { message: msg },
            ),
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        message: "internal server error".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_response_parts();
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        if err.is_transient() {
            ApiError::Unavailable(err.to_string())
        } else {
            ApiError::Unauthorized(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pending: usize,
    actors: usize,
    statuses: usize,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let (actors, statuses) = state
        .database
        .with_repositories(|repos| Ok((repos.actors().count()?, repos.statuses().count()?)))?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pending: state.ledger.count_pending()?,
        actors,
        statuses,
    }))
}

pub fn router(state: AppState) -> Router {
    let max_inbox_bytes = state.config.federation.max_inbox_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/inbox", post(inbox::shared_inbox))
        .route("/users/:username/inbox", post(inbox::user_inbox))
        .route("/u/:username/inbox", post(inbox::user_inbox))
        .layer(DefaultBodyLimit::max(max_inbox_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Tries to bind to the given port, or finds the next available port
async fn find_available_port(start_port: u16) -> Result<(TcpListener, u16)> {
    const MAX_PORT_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                if offset == 0 {
                    tracing::debug!(port, error = %e, "port in use, trying next port");
                }
            }
        }
    }

    anyhow::bail!(
        "could not find available port in range {}-{}",
        start_port,
        start_port.saturating_add(MAX_PORT_ATTEMPTS - 1)
    )
}

/// Serves on an already-bound listener until the server stops.
pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

pub async fn serve_http(state: AppState) -> Result<()> {
    let requested = state.config.api_port;
    let (listener, actual_port) = find_available_port(requested).await?;
    if actual_port != requested {
        tracing::warn!(
            requested_port = requested,
            actual_port,
            "configured port was in use, bound to next available port"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], actual_port));
    tracing::info!(
        ?addr,
        max_inbox_kb = state.config.federation.max_inbox_bytes / 1024,
        "HTTP server listening"
    );
    serve_on(listener, state).await
}
