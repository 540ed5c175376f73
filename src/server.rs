//! HTTP surface.
//!
//! Serves the operator endpoints (provision, ingest, reload, stats), the
//! chat endpoint, and the tool-export routes for agent runtimes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/v1/data/stats` | Store counts |
//! | `POST` | `/api/v1/data/provision` | Idempotent schema creation |
//! | `POST` | `/api/v1/data/ingest-directory` | Ingest one directory |
//! | `POST` | `/api/v1/data/load-references` | Full reference reload |
//! | `POST` | `/api/v1/chat` | One conversational turn |
//! | `GET`  | `/tools/list` | List exported tools with schemas |
//! | `POST` | `/tools/{name}` | Call an exported tool |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Ingestion failures come back as structured reports, never stack traces.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chat::ChatSession;
use crate::config::{resolve_path_here, Config};
use crate::identity::{UserDirectory, UserKind};
use crate::ingest::{IngestionFailure, IngestionOrchestrator, IngestionResult};
use crate::llm::CompletionService;
use crate::references::ReferenceCatalog;
use crate::session::{RagOptions, RetrievalSession};
use crate::store::StoreInfo;
use crate::tools::{ToolInfo, ToolRegistry};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<IngestionOrchestrator>,
    catalog: Arc<ReferenceCatalog>,
    tools: Arc<ToolRegistry>,
    directory: Arc<UserDirectory>,
    completion: Arc<dyn CompletionService>,
    retrieval: Arc<RetrievalSession>,
    /// One conversation per identity key. Each session has its own lock so
    /// one slow turn never stalls other users' turns.
    chats: Arc<tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<ChatSession>>>>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        orchestrator: Arc<IngestionOrchestrator>,
        catalog: Arc<ReferenceCatalog>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        let tools = Arc::new(ToolRegistry::from_catalog(&catalog, &config.tools.prefix));
        let retrieval = Arc::new(
            RetrievalSession::new(
                orchestrator.store().clone(),
                RagOptions::from_config(&config.retrieval),
            )
            .with_completion(completion.clone()),
        );
        Self {
            config,
            orchestrator,
            catalog,
            tools,
            directory: UserDirectory::new(),
            completion,
            retrieval,
            chats: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }
}

/// Start the HTTP server. Runs until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    for tool in state.tools.tools() {
        info!(tool = tool.name(), "tool exported");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/data/stats", get(handle_stats))
        .route("/api/v1/data/provision", post(handle_provision))
        .route("/api/v1/data/ingest-directory", post(handle_ingest_directory))
        .route("/api/v1/data/load-references", post(handle_load_references))
        .route("/api/v1/chat", post(handle_chat))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .layer(cors)
        .with_state(state);

    println!("docent listening on http://{}", bind_addr);

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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
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

// ============ Data management ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StoreInfo>, AppError> {
    let info = state
        .orchestrator
        .store()
        .info()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(info))
}

async fn handle_provision(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .orchestrator
        .store()
        .provision()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "provisioned": true })))
}

#[derive(Deserialize)]
struct IngestDirectoryRequest {
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestDirectoryResponse {
    ingested_documents: usize,
    failed_documents: Vec<IngestionFailure>,
}

async fn handle_ingest_directory(
    State(state): State<AppState>,
    Json(request): Json<IngestDirectoryRequest>,
) -> Result<Json<IngestDirectoryResponse>, AppError> {
    if request.path.trim().is_empty() {
        return Err(bad_request("path must not be empty"));
    }

    let resolved = resolve_path_here(&request.path);
    let outcome = state
        .orchestrator
        .ingest_directory(&resolved)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    Ok(Json(IngestDirectoryResponse {
        ingested_documents: outcome.ingested_documents,
        failed_documents: outcome.document_failures,
    }))
}

async fn handle_load_references(
    State(state): State<AppState>,
) -> Json<IngestionResult> {
    // Never an error: all failures are inside the result.
    Json(state.orchestrator.load_references().await)
}

// ============ POST /api/v1/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    user: Option<UserKind>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let key = request
        .user
        .as_ref()
        .map(|u| u.key())
        .unwrap_or_else(|| "anonymous".to_string());

    let session = {
        let mut chats = state.chats.lock().await;
        chats
            .entry(key)
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(ChatSession::new(
                    state.config.persona.default.clone(),
                    state.config.persona.prompt.clone(),
                    state.directory.clone(),
                    state.retrieval.clone(),
                    state.catalog.clone(),
                    state.completion.clone(),
                )))
            })
            .clone()
    };

    let mut chat = session.lock().await;
    let reply = chat.respond(request.user.clone(), &request.message).await;
    Ok(Json(ChatResponse {
        reply: reply.content,
    }))
}

// ============ Tool export ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let result = tool.execute(params).await.map_err(|e| {
        let msg = e.to_string();
        if msg.contains("must not be empty") || msg.contains("invalid") {
            bad_request(format!("{}: {}", name, msg))
        } else {
            tool_error(format!("{}: {}", name, msg))
        }
    })?;

    Ok(Json(serde_json::json!({ "result": result })))
}
