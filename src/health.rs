use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub liveness: HealthStatus,
    pub readiness: HealthStatus,
    pub last_message_processed: Option<std::time::Instant>,
    pub messages_published: u64,
    pub messages_rejected: u64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            liveness: HealthStatus::Starting,
            readiness: HealthStatus::Starting,
            last_message_processed: None,
            messages_published: 0,
            messages_rejected: 0,
        }
    }
}

pub type SharedHealthState = Arc<RwLock<HealthState>>;

// Health check handlers
async fn liveness_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.liveness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting => {
            info!(event = "probe", probe = "liveness", "Liveness probe: starting");
            StatusCode::OK // Allow pod to start
        }
        HealthStatus::Unhealthy => {
            error!(event = "probe", probe = "liveness", "Liveness probe: unhealthy");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn readiness_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.readiness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting | HealthStatus::Unhealthy => {
            error!(event = "probe", probe = "readiness", "Readiness probe: not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn startup_probe(State(health_state): State<SharedHealthState>) -> StatusCode {
    let state = health_state.read().await;

    match state.liveness {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Starting | HealthStatus::Unhealthy => {
            info!(event = "probe", probe = "startup", "Startup probe: not started yet");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Plain-text counters for operators: published, rejected and seconds since
/// the last published message.
async fn status(State(health_state): State<SharedHealthState>) -> String {
    let state = health_state.read().await;
    let idle = state
        .last_message_processed
        .map_or_else(|| "never".to_string(), |t| t.elapsed().as_secs().to_string());

    format!(
        "published {}\nrejected {}\nidle_secs {}\n",
        state.messages_published, state.messages_rejected, idle
    )
}

/// Serve `/healthz`, `/ready`, `/startup` and `/status` on `port` until the listener fails.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server stops with an I/O error.
pub async fn run_health_server(port: u16, health_state: SharedHealthState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(liveness_probe))
        .route("/ready", get(readiness_probe))
        .route("/startup", get(startup_probe))
        .route("/status", get(status))
        .with_state(health_state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind health server")?;

    info!(event = "health_server_listening", addr = %addr, "Health check server listening");

    axum::serve(listener, app)
        .await
        .context("Health server error")?;

    Ok(())
}
