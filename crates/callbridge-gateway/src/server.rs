//! Axum HTTP and WebSocket server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::connection::handle_audio_stream;
use crate::state::GatewayState;
use crate::tools_api::{delete_tool, list_tools, upsert_tool};
use crate::twiml::incoming_call_handler;

/// Routes served by the gateway.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/audio_stream", get(audio_stream_handler))
        .route("/incoming_call", post(incoming_call_handler))
        .route("/health", get(health_handler))
        .route("/sessions", get(sessions_handler))
        .route("/tools", get(list_tools).post(upsert_tool))
        .route("/tools/{name}", delete(delete_tool));

    #[cfg(feature = "metrics")]
    let app = match crate::metrics::install_prometheus_recorder() {
        Ok(handle) => app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Metrics recorder unavailable, /metrics disabled");
            app
        }
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the gateway and serve until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr();

    let _watcher = if state.config.tools().watch {
        match crate::hot_reload::ToolsWatcher::start(state.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Tool definitions watcher failed to start");
                None
            }
        }
    } else {
        None
    };

    let app = router(state.clone());
    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(backend = state.backend.id(), "CallBridge listening on {addr}");
    if let Some(host) = state.config.public_hostname() {
        info!("Media stream URL: wss://{host}/audio_stream");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn audio_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        handle_audio_stream(state, socket).await;
    })
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active = state.active_sessions().await;
    let completed = state
        .completed_sessions
        .load(std::sync::atomic::Ordering::Relaxed);

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "backend": state.backend.id(),
        "active_sessions": active,
        "completed_sessions": completed,
        "tools": state.registry.snapshot().len(),
    }))
}

async fn sessions_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({ "sessions": state.session_summaries().await }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use callbridge_core::config::{Config, ToolsConfig};
    use callbridge_providers::EchoBackend;
    use tower::ServiceExt;

    async fn state(dir: &tempfile::TempDir) -> Arc<GatewayState> {
        let config = Config {
            tools: Some(ToolsConfig {
                definitions_path: Some(dir.path().join("tools.json").to_string_lossy().into_owned()),
                ..ToolsConfig::default()
            }),
            ..Config::default()
        };
        Arc::new(
            GatewayState::new(config, Arc::new(EchoBackend::new()))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_health_reports_tools_and_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let resp = router(state(&dir).await)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["active_sessions"], 0);
        assert_eq!(body["tools"], 4);
    }

    #[tokio::test]
    async fn test_incoming_call_uses_host_header() {
        let dir = tempfile::tempdir().unwrap();
        let resp = router(state(&dir).await)
            .oneshot(
                Request::post("/incoming_call")
                    .header("host", "voice.example.org")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let xml = String::from_utf8(body.to_vec()).unwrap();
        assert!(xml.contains("wss://voice.example.org/audio_stream"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tool_upserts_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let app = router(state.clone());

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let app = app.clone();
                tokio::spawn(async move {
                    let body = json!({
                        "name": format!("tool_{i}"),
                        "description": "generated",
                        "parameters": { "type": "object" }
                    });
                    app.oneshot(
                        Request::post("/tools")
                            .header("content-type", "application/json")
                            .body(Body::from(body.to_string()))
                            .unwrap(),
                    )
                    .await
                    .unwrap()
                    .status()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
        }

        assert_eq!(state.store.load().await.unwrap().len(), 40);
        assert_eq!(state.registry.snapshot().len(), 44);

        // A restarted gateway reads the same file back.
        let restarted = GatewayState::new((*state.config).clone(), Arc::new(EchoBackend::new()))
            .await
            .unwrap();
        assert_eq!(restarted.registry.snapshot().len(), 44);
    }

    #[tokio::test]
    async fn test_audio_stream_requires_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let resp = router(state(&dir).await)
            .oneshot(Request::get("/audio_stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }
}
