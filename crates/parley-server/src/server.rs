use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::Translator;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::handler::RelayContext;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::socket;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: RelayContext,
    pub translator: Arc<dyn Translator>,
    pub shutdown: ShutdownCoordinator,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/translate-text", post(translate_text_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind, serve in the background, and return a handle to stop it.
pub async fn start(
    config: RelayConfig,
    translator: Arc<dyn Translator>,
) -> Result<ServerHandle, std::io::Error> {
    let addr = config.bind_addr();
    let ctx = RelayContext::new(config);
    let shutdown = ShutdownCoordinator::new();
    let state = AppState {
        ctx: ctx.clone(),
        translator,
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        history_limit = ctx.config.history_limit,
        echo_translations = ctx.config.echo_translations,
        duplicate_ids = %ctx.config.duplicate_ids,
        "relay server started"
    );

    let router = build_router(state);
    let token = shutdown.token();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        ctx,
        shutdown,
        task,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub port: u16,
    ctx: RelayContext,
    shutdown: ShutdownCoordinator,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn connection_count(&self) -> usize {
        self.ctx.connection_count()
    }

    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown.token()
    }

    /// Stop accepting, close open connections, and wait for the server task.
    pub async fn shutdown(self) {
        self.shutdown.graceful_shutdown(vec![self.task], None).await;
        info!("relay server stopped");
    }
}

fn upgrade(ws: WebSocketUpgrade, state: AppState) -> Response {
    let ctx = state.ctx;
    let token = state.shutdown.token();
    ws.max_message_size(ctx.config.max_message_size)
        .on_upgrade(move |socket| socket::handle_ws_connection(socket, ctx, token))
}

/// Clients connect to the bare host; plain HTTP gets the banner.
async fn root_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state),
        Err(_) => Json(serde_json::json!({ "message": "Live translation relay is running" }))
            .into_response(),
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "rooms": state.ctx.registry.len(),
        "connections": state.ctx.connection_count(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateTextRequest {
    #[serde(default)]
    text: String,
    #[serde(default = "default_target_language")]
    target_language: String,
}

fn default_target_language() -> String {
    "en".into()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateTextResponse {
    success: bool,
    original_text: String,
    translation: String,
    target_language: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn translate_text_handler(
    State(state): State<AppState>,
    body: Result<Json<TranslateTextRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if request.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "text to translate is required");
    }

    match state
        .translator
        .translate(&request.text, &request.target_language)
        .await
    {
        Ok(translation) => Json(TranslateTextResponse {
            success: true,
            original_text: request.text,
            translation,
            target_language: request.target_language,
        })
        .into_response(),
        Err(e) => {
            warn!(translator = state.translator.name(), error = %e, "text translation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
