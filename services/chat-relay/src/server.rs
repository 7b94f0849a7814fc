use std::future::Future;
use std::sync::Arc;

use agent_runtime::AgentRuntime;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use crate::relay::run_session;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<dyn AgentRuntime>,
    pub registry: SessionRegistry,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(runtime: Arc<dyn AgentRuntime>, config: RelayConfig) -> Self {
        Self {
            runtime,
            registry: SessionRegistry::new(),
            config: Arc::new(config),
        }
    }

    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = registry;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/ws/:session_id", get(ws_handler));

    if state.config.serves_static() {
        router = router.nest_service("/static", ServeDir::new(state.config.static_dir()));
    } else {
        warn!(
            dir = %state.config.static_dir().display(),
            "index.html not found, static files are not served"
        );
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), RelayError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "chat relay listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("chat relay stopped");
    Ok(())
}

async fn index(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(state.config.index_path()).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            debug!(error = %err, "index.html unavailable");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "index.html not found" })),
            )
                .into_response()
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (sink, stream) = socket.split();
    // Start failures are already logged and reported to the client.
    let _ = run_session(state.runtime, state.registry, session_id, sink, stream).await;
}
