use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use taskcell_agent::{SessionReaper, TaskController};
use taskcell_core::{Error, ResponseStatus, ToolRequest, ToolResponse};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::build_controller;

#[derive(Clone)]
struct GatewayState {
    controller: TaskController,
    started: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    driver: String,
    sessions: usize,
    uptime_secs: u64,
    version: String,
}

/// HTTP status for a controller reply. The body is the structured response
/// either way.
fn status_code(resp: &ToolResponse) -> StatusCode {
    if resp.status != ResponseStatus::Error {
        return StatusCode::OK;
    }
    match resp.error_kind.as_deref() {
        Some("session_not_found") => StatusCode::NOT_FOUND,
        Some("invalid_action") | Some("missing_parameter") | Some("validation") | Some("json") => {
            StatusCode::BAD_REQUEST
        }
        Some("invalid_state") => StatusCode::CONFLICT,
        Some("session_limit") => StatusCode::TOO_MANY_REQUESTS,
        Some("driver_error") => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The body is decoded here rather than by the `Json` extractor so a
/// malformed request still gets a structured reply.
async fn handle_perform(State(state): State<GatewayState>, body: Bytes) -> impl IntoResponse {
    let response = match serde_json::from_slice::<ToolRequest>(&body) {
        Ok(request) => state.controller.perform(request).await,
        Err(e) => ToolResponse::from_error(&Error::Json(e)),
    };
    (status_code(&response), Json(response))
}

async fn handle_sessions(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.controller.list_sessions().await)
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        driver: state.controller.driver_name().to_string(),
        sessions: state.controller.store().len(),
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/perform", post(handle_perform))
        .route("/v1/sessions", get(handle_sessions))
        .route("/v1/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let (config, _paths, controller) = build_controller()?;
    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let reaper_handle = {
        let reaper = Arc::new(SessionReaper::new(controller.clone()));
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            reaper.run_loop(shutdown_rx).await;
        })
    };

    let app = router(GatewayState {
        controller: controller.clone(),
        started: Instant::now(),
    });

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, driver = %config.driver.kind, "Gateway listening");

    let http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = http_shutdown_rx;
                let _ = rx.recv().await;
            })
            .await
            .ok();
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing sessions...");

    let _ = shutdown_tx.send(());
    controller.shutdown_all().await;

    for (name, handle) in [("http_server", http_handle), ("reaper", reaper_handle)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }
    info!("Gateway stopped");
    Ok(())
}
