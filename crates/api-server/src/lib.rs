//! HTTP service answering S/V point predictions from a frozen posterior.
//!
//! The artifact is loaded once at startup into [`AppState`] and never
//! mutated; every request is a pure function of it and the input vector.

pub mod request_id;
pub mod routes;

use anyhow::Context;
use axum::{
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use sv_core::{FrozenArtifact, Predictor, SvError};

#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<Predictor>,
}

impl AppState {
    pub fn new(predictor: Predictor) -> Self {
        Self {
            predictor: Arc::new(predictor),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub artifacts_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match lookup("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT={v} is not a valid port"))?,
            None => 8000,
        };
        let timeout_secs: u64 = match lookup("SV_REQUEST_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("SV_REQUEST_TIMEOUT_SECS={v} is not a number"))?,
            None => 10,
        };
        Ok(Self {
            artifacts_dir: lookup("SV_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("artifacts")),
            host: lookup("SV_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Error returned from handlers; renders as `{"error": "..."}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    pub fn with_status(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl From<SvError> for AppError {
    fn from(e: SvError) -> Self {
        let status = match &e {
            SvError::FeatureShape { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SvError::InvalidRecord { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::with_status(status, e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed: {:#}", self.error);
        } else {
            tracing::debug!("request rejected: {}", self.error);
        }
        let body = routes::ErrorBody {
            error: self.error.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(routes::health))
        .route("/predict", post(routes::predict))
        .route("/api-docs/openapi.json", get(routes::openapi_json))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("api_server=info,sv_core=info,tower_http=info")
    });
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}

/// Load the artifact, then serve until interrupted. Fails before binding
/// if any artifact component is missing or inconsistent.
pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    let artifact = FrozenArtifact::load_from_dir(&config.artifacts_dir).with_context(|| {
        format!(
            "loading frozen artifact from {}",
            config.artifacts_dir.display()
        )
    })?;
    let state = AppState::new(Predictor::new(artifact)?);
    let app = build_router(state, config.request_timeout);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🚀 S/V prediction service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
