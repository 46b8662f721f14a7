//! HTTP service.
//!
//! Exposes ingestion, retrieval, answering and database management as a JSON
//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/embed` | multipart `file`, `title` | Ingest one document |
//! | `POST` | `/search` | form `q`, `top_k` | Nearest chunks |
//! | `POST` | `/rag` | form `q`, `top_k` | Answer with sources and timings |
//! | `POST` | `/api/v1/query` | JSON `question`, `top_k` | Compact answer |
//! | `GET` | `/list` | | Stored documents |
//! | `DELETE` | `/documents/{id}` | | Delete a document |
//! | `DELETE` | `/clear` | | Delete every document |
//! | `POST` | `/reembed` | form `doc_ids` | Recompute vectors |
//! | `GET`/`POST` | `/config` | JSON `vector_mode` | Runtime configuration |
//! | `GET` | `/databases` | | Database profiles |
//! | `POST` | `/databases/switch` | JSON `database_name` | Change active database |
//! | `GET` | `/health` | | Liveness |
//! | `GET` | `/status` | | Database and model status |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "schema_mismatch", "message": "...", "hint": "..." } }
//! ```
//!
//! Status codes: `bad_request` 400, `not_found` 404, `upstream_error` 502,
//! `database_unavailable` 503, everything else 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::Multipart,
        rejection::{FormRejection, JsonRejection},
        DefaultBodyLimit, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::DatabaseInfo;
use crate::error::RagError;
use crate::extract;
use crate::ingest::{IngestReport, Upload};
use crate::models::{DocumentSummary, ReembedEntry, VectorMode};
use crate::rag::RagAnswer;
use crate::service::{ConfigView, RagService, SearchResponse, StatusReport};
use crate::store::ReembedScope;

/// Largest accepted request body.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

type AppState = Arc<RagService>;

/// Open the service for `config` and serve it on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::open(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(address = %listener.local_addr()?, "listening");
    eprintln!("vecrag listening on http://{}", bind_addr);

    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// All routes over `service`.
pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/embed", post(handle_embed))
        .route("/search", post(handle_search))
        .route("/rag", post(handle_rag))
        .route("/api/v1/query", post(handle_query))
        .route("/list", get(handle_list))
        .route("/documents/{id}", delete(handle_delete))
        .route("/clear", delete(handle_clear))
        .route("/reembed", post(handle_reembed))
        .route("/config", get(handle_get_config).post(handle_set_config))
        .route("/databases", get(handle_databases))
        .route("/databases/switch", post(handle_switch_database))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
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
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

/// Error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    hint: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                hint: self.hint,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            RagError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Database(_) | RagError::SchemaMismatch { .. } | RagError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            hint: err.hint().map(str::to_string),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        hint: None,
    }
}

type HandlerResult<T> = Result<Json<T>, AppError>;

// ============ POST /embed ============

async fn handle_embed(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> HandlerResult<IngestReport> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                file = Some((name, content_type, bytes.to_vec()));
            }
            Some("title") => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("invalid title: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let (name, declared_type, bytes) =
        file.ok_or_else(|| bad_request("multipart field 'file' is required"))?;

    // Browsers often send application/octet-stream; fall back to the extension.
    let content_type = match declared_type.as_deref() {
        Some(ct) if extract::classify(ct).is_ok() => ct.to_string(),
        other => extract::content_type_for_path(std::path::Path::new(&name))
            .map(str::to_string)
            .or_else(|| other.map(str::to_string))
            .unwrap_or_default(),
    };

    let report = service
        .ingest(Upload {
            name: &name,
            bytes: &bytes,
            content_type: &content_type,
            title: title.as_deref(),
        })
        .await?;
    Ok(Json(report))
}

// ============ POST /search, /rag ============

#[derive(Deserialize)]
struct QueryForm {
    q: String,
    top_k: Option<usize>,
}

async fn handle_search(
    State(service): State<AppState>,
    form: Result<Form<QueryForm>, FormRejection>,
) -> HandlerResult<SearchResponse> {
    let Form(form) = form.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(service.search(&form.q, form.top_k).await?))
}

async fn handle_rag(
    State(service): State<AppState>,
    form: Result<Form<QueryForm>, FormRejection>,
) -> HandlerResult<RagAnswer> {
    let Form(form) = form.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(service.ask(&form.q, form.top_k).await?))
}

// ============ POST /api/v1/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    answer: String,
    source: String,
    response_time_ms: u64,
}

async fn handle_query(
    State(service): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> HandlerResult<QueryResponse> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let answer = service.ask(&request.question, request.top_k).await?;

    let mut names: Vec<&str> = Vec::new();
    for source in &answer.sources {
        if !names.contains(&source.name.as_str()) {
            names.push(&source.name);
        }
    }

    Ok(Json(QueryResponse {
        source: names.join(", "),
        response_time_ms: answer.timings.total_ms,
        answer: answer.answer,
    }))
}

// ============ GET /list, DELETE /documents/{id} ============

#[derive(Serialize)]
struct ListResponse {
    documents: Vec<DocumentSummary>,
    count: usize,
}

async fn handle_list(State(service): State<AppState>) -> HandlerResult<ListResponse> {
    let documents = service.list().await?;
    Ok(Json(ListResponse {
        count: documents.len(),
        documents,
    }))
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    id: String,
    chunks_deleted: usize,
}

async fn handle_delete(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> HandlerResult<DeleteResponse> {
    let chunks_deleted = service.delete(&id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        id,
        chunks_deleted,
    }))
}

// ============ DELETE /clear ============

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
    chunks_deleted: usize,
}

async fn handle_clear(State(service): State<AppState>) -> HandlerResult<ClearResponse> {
    let chunks_deleted = service.clear().await?;
    Ok(Json(ClearResponse {
        success: true,
        chunks_deleted,
    }))
}

// ============ POST /reembed ============

#[derive(Deserialize)]
struct ReembedForm {
    doc_ids: Option<String>,
}

#[derive(Serialize)]
struct ReembedResponse {
    reembedded: Vec<ReembedEntry>,
    count: usize,
}

async fn handle_reembed(
    State(service): State<AppState>,
    form: Result<Form<ReembedForm>, FormRejection>,
) -> HandlerResult<ReembedResponse> {
    // A bare POST without a form body re-embeds everything.
    let doc_ids = match form {
        Ok(Form(form)) => form.doc_ids,
        Err(FormRejection::InvalidFormContentType(_)) => None,
        Err(e) => return Err(bad_request(e.body_text())),
    };
    let scope = ReembedScope::from_list(doc_ids.as_deref());
    let reembedded = service.reembed(&scope).await?;
    Ok(Json(ReembedResponse {
        count: reembedded.len(),
        reembedded,
    }))
}

// ============ GET/POST /config ============

async fn handle_get_config(State(service): State<AppState>) -> HandlerResult<ConfigView> {
    Ok(Json(service.config_view().await?))
}

#[derive(Deserialize)]
struct SetConfigRequest {
    vector_mode: String,
}

#[derive(Serialize)]
struct SetConfigResponse {
    success: bool,
    vector_mode: VectorMode,
    message: String,
}

async fn handle_set_config(
    State(service): State<AppState>,
    body: Result<Json<SetConfigRequest>, JsonRejection>,
) -> HandlerResult<SetConfigResponse> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let mode: VectorMode = request.vector_mode.parse()?;
    service.set_vector_mode(mode).await?;
    Ok(Json(SetConfigResponse {
        success: true,
        vector_mode: mode,
        message: format!(
            "Vector mode set to {}. Re-embed existing documents to search them in this mode.",
            mode
        ),
    }))
}

// ============ /databases ============

#[derive(Serialize)]
struct DatabasesResponse {
    databases: Vec<DatabaseInfo>,
    count: usize,
}

async fn handle_databases(State(service): State<AppState>) -> Json<DatabasesResponse> {
    let databases = service.databases().await;
    Json(DatabasesResponse {
        count: databases.len(),
        databases,
    })
}

#[derive(Deserialize)]
struct SwitchRequest {
    database_name: String,
}

#[derive(Serialize)]
struct SwitchResponse {
    success: bool,
    database: String,
    connection_info: String,
    message: String,
}

async fn handle_switch_database(
    State(service): State<AppState>,
    body: Result<Json<SwitchRequest>, JsonRejection>,
) -> HandlerResult<SwitchResponse> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let info = service.switch_database(&request.database_name).await?;
    Ok(Json(SwitchResponse {
        success: true,
        message: format!("Switched to database '{}'", info.name),
        database: info.name,
        connection_info: info.path,
    }))
}

// ============ GET /health, /status ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn handle_status(State(service): State<AppState>) -> Json<StatusReport> {
    Json(service.status().await)
}
