//! HTTP server for exposing Prometheus metrics.
//!
//! This module provides an Axum-based HTTP server that serves the telemetry
//! endpoint for Prometheus scraping, a `/health` endpoint for health checks,
//! and a landing page at `/`.

use crate::error::Result;
use crate::exporter::Exporter;
use crate::metrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    exporter: Arc<Exporter>,
    self_metrics: Registry,
    telemetry_path: Arc<str>,
}

impl AppState {
    pub fn new(exporter: Exporter, self_metrics: Registry, telemetry_path: &str) -> Self {
        Self {
            exporter: Arc::new(exporter),
            self_metrics,
            telemetry_path: Arc::from(telemetry_path),
        }
    }
}

/// Build the router serving metrics, health and the landing page.
pub fn router(state: AppState) -> Router {
    let telemetry_path = state.telemetry_path.to_string();

    Router::new()
        .route(&telemetry_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Examples
///
/// ```no_run
/// use tapo_exporter::client::HttpConnector;
/// use tapo_exporter::config::Settings;
/// use tapo_exporter::exporter::Exporter;
/// use tapo_exporter::metrics::self_metrics;
/// use tapo_exporter::server::{start_server, AppState};
///
/// #[tokio::main]
/// async fn main() {
///     let settings = Settings::load(Some("config/default.toml")).unwrap();
///     let connector = HttpConnector::new(&settings.tapo).unwrap();
///     let exporter =
///         Exporter::new(&settings.tapo.devices, &connector, &settings.tapo.power_models).unwrap();
///     let state = AppState::new(exporter, self_metrics(false).unwrap(), "/metrics");
///     start_server("0.0.0.0:9782", state).await.unwrap();
/// }
/// ```
pub async fn start_server(listen_address: &str, state: AppState) -> Result<()> {
    let app = router(state);

    info!("Starting HTTP server on {}", listen_address);

    let listener = TcpListener::bind(listen_address).await?;

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::TapoError::Server(e.to_string()))?;

    Ok(())
}

/// Handler for the telemetry endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    info!("Received metrics scrape request");

    let mut families = state.exporter.collect().await;
    families.extend(state.self_metrics.gather());

    match metrics::encode(&families) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Handler for root endpoint.
async fn root_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Tapo Exporter</title></head>
<body>
    <h1>Tapo Exporter</h1>
    <p><a href="{path}">Metrics</a></p>
    <p><a href="/health">Health</a></p>
</body>
</html>
"#,
        path = state.telemetry_path
    ))
}
