//! HTTP API.
//!
//! Serves questions against the persisted index through a JSON API. The
//! index is loaded once at startup (a missing or incompatible index is fatal)
//! and swapped in memory after a successful `POST /index/rebuild`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check with index size and model |
//! | `POST` | `/ask` | Answer a question, return answer and sources |
//! | `POST` | `/ask/stream` | Same, as Server-Sent Events |
//! | `POST` | `/index/rebuild` | Rebuild the index from the docs directory |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_unavailable` (503),
//! `upstream_error` (502), `internal` (500).
//!
//! # Streaming events
//!
//! `fragment` (`{"answer_fragment": "..."}`), then `context`
//! (`{"context": [...]}`) and `done`. A failed exchange ends with `error`
//! (`{"message": "..."}`) instead.
//!
//! The server keeps no conversation state: clients send the transcript of
//! earlier exchanges as `history`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::error::RagError;
use docqa_core::generation::GenerationProvider;
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::index::VectorIndex;
use docqa_core::session::Session;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::conversation::{AskResponse, ExchangeEvent, Orchestrator};
use crate::index_store;
use crate::ingest::build_index;

const EVENT_BUFFER: usize = 32;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingProvider>,
    orchestrator: Arc<RwLock<Orchestrator>>,
    /// Serializes rebuilds.
    rebuild: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        index: InMemoryIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> anyhow::Result<Self> {
        let params = config.retrieval.params()?;
        let orchestrator = Orchestrator::new(Arc::new(index), embedder.clone(), generator, params)
            .with_known_models(config.generation.models.clone());
        Ok(Self {
            config: Arc::new(config),
            embedder,
            orchestrator: Arc::new(RwLock::new(orchestrator)),
            rebuild: Arc::new(Mutex::new(())),
        })
    }

    async fn orchestrator(&self) -> Orchestrator {
        self.orchestrator.read().await.clone()
    }
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/ask/stream", post(handle_ask_stream))
        .route("/index/rebuild", post(handle_rebuild))
        .layer(cors)
        .with_state(state)
}

/// Load the index and serve until the process is terminated.
pub async fn run_server(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
) -> anyhow::Result<()> {
    let index = index_store::load_compatible(&config.index.path, embedder.as_ref()).await?;
    info!(chunks = index.len(), path = %config.index.path.display(), "index loaded");

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), index, embedder, generator)?;
    let app = router(state);

    println!("docqa listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::Config(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::IndexLoad { .. } => (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
            RagError::Embedding { .. } | RagError::Generation { .. } => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
    embedding_model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = state.orchestrator().await;
    let index = orchestrator.index();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks: index.len(),
        embedding_model: index.info().model.clone(),
    })
}

// ============ POST /ask ============

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Transcript of earlier exchanges.
    #[serde(default)]
    pub history: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl AskRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.question.trim().is_empty() {
            return Err(bad_request("question must not be empty"));
        }
        Ok(())
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    req.validate()?;
    let orchestrator = state.orchestrator().await;
    let mut session = Session::with_transcript(req.history);
    let response = orchestrator
        .ask(&mut session, &req.question, req.model.as_deref())
        .await?;
    Ok(Json(response))
}

// ============ POST /ask/stream ============

async fn handle_ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    req.validate()?;
    let orchestrator = state.orchestrator().await;
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let mut session = Session::with_transcript(req.history);
        let result = orchestrator
            .respond(&mut session, &req.question, req.model.as_deref(), Some(&tx))
            .await;
        match result {
            // Generation failures already sent their own event.
            Err(RagError::Generation { .. }) => {}
            Err(e) => {
                warn!(error = %e, "streamed exchange failed");
                let _ = tx.send(ExchangeEvent::Failed(e.to_string())).await;
            }
            Ok(_) => {}
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let sse = match event {
                ExchangeEvent::Fragment(text) => Event::default()
                    .event("fragment")
                    .data(serde_json::json!({ "answer_fragment": text }).to_string()),
                ExchangeEvent::Context(sources) => Event::default()
                    .event("context")
                    .data(serde_json::json!({ "context": sources }).to_string()),
                ExchangeEvent::Completed => Event::default().event("done").data("{}"),
                ExchangeEvent::Failed(message) => Event::default()
                    .event("error")
                    .data(serde_json::json!({ "message": message }).to_string()),
            };
            yield Ok(sse);
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

// ============ POST /index/rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    documents_loaded: usize,
    chunks_created: usize,
    skipped: Vec<String>,
    index_written: bool,
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>, AppError> {
    let _guard = state.rebuild.lock().await;

    let report = build_index(&state.config, state.embedder.as_ref()).await?;
    if report.index_written {
        let index = index_store::load(&state.config.index.path).await?;
        let mut orchestrator = state.orchestrator.write().await;
        let fresh = orchestrator.with_index(Arc::new(index));
        *orchestrator = fresh;
        info!(chunks = report.chunks_created, "index swapped");
    }

    Ok(Json(RebuildResponse {
        documents_loaded: report.documents_loaded,
        chunks_created: report.chunks_created,
        skipped: report.skipped.iter().map(|e| e.to_string()).collect(),
        index_written: report.index_written,
    }))
}
