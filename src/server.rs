//! HTTP and WebSocket transport.
//!
//! Serves the documentation pipeline to browser clients. Each WebSocket
//! connection on `/generate` gets its own [`Session`], working area, and
//! settings; nothing mutable is shared between connections.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/generate` | WebSocket: send repository URLs, receive progress frames |
//! | `GET`  | `/docs?repo=<name>.md` | Stored markdown for a repository |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/*` | Static files from `[server].static_dir`, when configured |
//!
//! # WebSocket Protocol
//!
//! Inbound text frames are repository locations, or the literal `Stop` to
//! end the session. Outbound frames are plain text, one per progress event;
//! every iteration ends with the frame `Done`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "repo must end with .md" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `storage_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::fetch::GitCloner;
use crate::generate::GeminiGenerator;
use crate::progress::{ChannelReporter, ProgressEvent, Stage};
use crate::session::{Channel, Collaborators, Session, SessionEnd, SessionSettings};
use crate::storage::{storer_from_config, validate_key};
use crate::workspace::WorkingArea;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Template copied into every new session.
    settings: Arc<SessionSettings>,
    workspace_root: PathBuf,
    max_frame_bytes: usize,
    collaborators: Collaborators,
}

impl AppState {
    pub fn new(config: &Config, collaborators: Collaborators) -> anyhow::Result<Self> {
        Ok(Self {
            settings: Arc::new(SessionSettings::from_config(config)?),
            workspace_root: config.workspace.root.clone(),
            max_frame_bytes: config.server.max_frame_bytes,
            collaborators,
        })
    }
}

/// Build the production collaborators from configuration.
pub fn collaborators_from_config(config: &Config) -> anyhow::Result<Collaborators> {
    Ok(Collaborators {
        cloner: Arc::new(GitCloner::new(&config.clone)),
        generator: Arc::new(GeminiGenerator::from_config(&config.generation)?),
        storer: storer_from_config(&config.storage)?,
    })
}

/// Assemble the router. `static_dir`, when given, is served for any path
/// not matched by an API route.
pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/generate", get(handle_generate))
        .route("/docs", get(handle_docs))
        .route("/health", get(handle_health));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(cors).with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind`. The server runs
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let collaborators = collaborators_from_config(config)?;
    let state = AppState::new(config, collaborators)?;
    tracing::info!(
        storage = %state.collaborators.storer.describe(),
        workspace = %config.workspace.root.display(),
        "collaborators ready"
    );

    let app = router(state, config.server.static_dir.clone());

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn storage_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "storage_error".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /docs ============

#[derive(Deserialize)]
struct DocsQuery {
    repo: Option<String>,
}

/// Storage key for a `repo` query value such as `docengine.md`.
fn docs_key(repo: &str) -> std::result::Result<String, AppError> {
    let repo = repo.trim();
    if repo.is_empty() {
        return Err(bad_request("repo must not be empty"));
    }
    let stem = repo
        .strip_suffix(".md")
        .ok_or_else(|| bad_request("repo must end with .md"))?;
    if stem.is_empty() || stem.contains('/') {
        return Err(bad_request(format!("invalid repo name '{}'", repo)));
    }
    let key = format!("docs/{}", repo);
    validate_key(&key).map_err(|_| bad_request(format!("invalid repo name '{}'", repo)))?;
    Ok(key)
}

async fn handle_docs(
    State(state): State<AppState>,
    Query(query): Query<DocsQuery>,
) -> std::result::Result<Response, AppError> {
    let repo = query
        .repo
        .ok_or_else(|| bad_request("missing 'repo' query parameter"))?;
    let key = docs_key(&repo)?;

    match state.collaborators.storer.get(&key).await {
        Ok(Some(markdown)) => Ok((
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            markdown,
        )
            .into_response()),
        Ok(None) => Err(not_found(format!("no documentation stored for '{}'", repo))),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "failed to read stored documentation");
            Err(storage_error(e.to_string()))
        }
    }
}

// ============ GET /generate (WebSocket) ============

async fn handle_generate(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Inbound half of a WebSocket connection.
struct WsChannel {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn recv(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => return Ok(Some(text.to_string())),
                Ok(WsMessage::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(WsMessage::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(PipelineError::Connection(e.to_string())),
            }
        }
        Ok(None)
    }
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sink, stream) = socket.split();

    let area = match WorkingArea::acquire(&state.workspace_root) {
        Ok(area) => area,
        Err(e) => {
            tracing::error!(error = %e, "could not create working area");
            let failed = ProgressEvent::Failed {
                stage: Stage::Workspace,
                reason: e.to_string(),
            };
            for event in [failed, ProgressEvent::Done] {
                if sink.send(WsMessage::Text(event.to_frame().into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let (reporter, mut events) = ChannelReporter::new();

    // Writer: drain progress events to the socket in emission order.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(event.to_frame().into())).await {
                tracing::warn!(error = %e, "failed to send progress frame");
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    let settings = (*state.settings).clone();
    let mut session = Session::new(settings, state.collaborators.clone(), Arc::new(reporter), area);
    let mut channel = WsChannel { stream };

    tracing::info!("client connected");
    let end = session.run(&mut channel).await;
    match end {
        SessionEnd::Closed => tracing::info!("client disconnected"),
        SessionEnd::Stopped => tracing::info!("client requested stop"),
        SessionEnd::Aborted(ref e) => tracing::warn!(error = %e, "session aborted"),
    }

    // Dropping the session drops the reporter, which closes the writer's queue
    // once every pending frame has been sent.
    drop(session);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "progress writer task failed");
    }
}
