//! HTTP surface of the gateway.
//!
//! All data source endpoints are `POST /data_source/<operation>` with the
//! source configuration in the body. Failures are `400 {msg, error}`.

pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::agent::AgentOptions;
use crate::config::Config;
use crate::db::QueryExecutor;

pub use error::{ApiError, ApiResult};

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const MAX_REQUEST_ID_LEN: usize = 128;

/// In-flight requests get this long to finish after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every request. Holds no connections.
#[derive(Debug, Clone, Copy)]
pub struct AppState {
    pub executor: QueryExecutor,
    pub agent_options: AgentOptions,
    pub llm_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            executor: config.executor(),
            agent_options: config.agent_options(),
            llm_timeout: config.llm_timeout(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/data_source/conn_test", post(handlers::conn_test))
        .route("/data_source/get_metadata", post(handlers::get_metadata))
        .route(
            "/data_source/get_metadata_with_value_examples",
            post(handlers::get_metadata_with_value_examples),
        )
        .route(
            "/data_source/get_server_version",
            post(handlers::get_server_version),
        )
        .route("/data_source/sql_query", post(handlers::sql_query))
        .route("/data_source/query_by_nl", post(handlers::query_by_nl))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

/// Wraps each request in a span carrying its id and logs the outcome.
async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);
    let start = Instant::now();
    let mut resp = next.run(req).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| {
        if resp.status().is_server_error() {
            error!(status, latency_ms, "Request failed");
        } else if resp.status().is_client_error() {
            warn!(status, latency_ms, "Request rejected");
        } else {
            info!(status, latency_ms, "Request completed");
        }
    });
    resp
}

/// Serve on an already bound listener until SIGINT or SIGTERM.
///
/// After the first signal, open requests get [`GRACEFUL_TIMEOUT`]; a second
/// signal exits immediately.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let app = router(state);

    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();
    let shutdown_signal = async move {
        wait_for_signal().await;
        shutdown_notify_clone.notify_one();
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

    tokio::select! {
        result = server => {
            match result {
                Ok(()) => info!("HTTP server stopped"),
                Err(e) => {
                    error!(error = %e, "HTTP server error");
                    return Err(e);
                }
            }
        }
        _ = async {
            shutdown_notify.notified().await;
            info!(
                timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                "Waiting for requests to finish (send signal again to force exit)..."
            );
            tokio::select! {
                _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                    warn!("Graceful shutdown timeout, forcing exit");
                }
                _ = wait_for_signal() => {
                    warn!("Received second signal, forcing immediate exit");
                }
            }
        } => {}
    }

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_config() {
        let mut config = Config::default_config();
        config.result_num_limit = 25;
        config.llm_timeout_secs = 9;
        let state = AppState::from_config(&config);
        assert_eq!(state.agent_options.result_num_limit, 25);
        assert_eq!(state.llm_timeout, Duration::from_secs(9));
    }
}
