//! HTTP/JSON service facade.
//!
//! Translates network requests into coordinator calls. Every handler takes
//! the single process-wide coordinator lock inside `spawn_blocking`: the
//! store, the ANN index, and the position→id mapping must transition
//! together, and the transformer forward pass (or a full rebuild) runs with
//! the lock held. Head-of-line blocking is the accepted cost.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Document and index counts |
//! | `POST` | `/search` | Semantic, substring, or metadata search |
//! | `POST` | `/documents` | Insert one document |
//! | `POST` | `/documents/batch` | Insert several documents transactionally |
//! | `PUT`  | `/documents/{id}` | Upsert by id |
//! | `GET`  | `/documents/{id}` | Fetch by id |
//! | `GET`  | `/documents` | List all, or filter by `?key=&value=` |
//! | `GET`  | `/documents/count` | Count all, or filter by `?key=&value=` |
//! | `DELETE` | `/documents/{id}` | Delete by id |
//! | `POST` | `/index/rebuild` | Re-embed everything and rebuild the index |
//! | `POST` | `/index/save` | Serialize the index to disk |
//!
//! Errors map to `400` (`BadRequest`), `404` (`NotFound`), and `500`
//! (everything else) with body `{"error": <message>}`. CORS is wide open;
//! preflight `OPTIONS` always succeeds. Mutating endpoints serialize the
//! index after each successful change so a crash loses at most the
//! in-flight write.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::models::{Document, NewDocument, SearchResult};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Mutex<Coordinator>>,
    pub index_path: Arc<PathBuf>,
}

/// Start serving on the configured host and port until SIGINT/SIGTERM.
pub async fn run_server(config: &ServerConfig, coordinator: Coordinator) -> anyhow::Result<()> {
    let state = AppState {
        coordinator: Arc::new(Mutex::new(coordinator)),
        index_path: Arc::new(config.index_path.clone()),
    };
    let app = create_router(state.clone());

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight requests have drained; any caller arriving after this point
    // gets a clean failure instead of racing teardown.
    state.coordinator.lock().close();
    tracing::info!("coordinator closed");
    Ok(())
}

/// Build the router. Exposed separately so tests can drive the API on an
/// ephemeral port without a real model.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/documents", post(handle_insert).get(handle_list))
        .route("/documents/batch", post(handle_batch_insert))
        .route("/documents/count", get(handle_count))
        .route(
            "/documents/{id}",
            axum::routing::put(handle_upsert)
                .get(handle_get_by_id)
                .delete(handle_delete),
        )
        .route("/index/rebuild", post(handle_rebuild))
        .route("/index/save", post(handle_save))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

// ============ Error mapping ============

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError(Error::BadRequest(message.to_string()))
}

/// Run `op` under the coordinator lock on the blocking pool.
async fn with_coordinator<T, F>(state: &AppState, op: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce(&mut Coordinator) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let coordinator = Arc::clone(&state.coordinator);
    tokio::task::spawn_blocking(move || {
        let mut guard = coordinator.lock();
        op(&mut guard)
    })
    .await
    .map_err(|e| ApiError(Error::Internal(format!("coordinator task failed: {e}"))))?
    .map_err(ApiError)
}

// ============ Request bodies ============

#[derive(Deserialize)]
struct SearchRequest {
    query: Option<String>,
    k: Option<usize>,
    threshold: Option<f32>,
    #[serde(rename = "efSearch")]
    ef_search: Option<usize>,
    #[serde(rename = "type")]
    search_type: Option<String>,
    metadata: Option<MetadataFilter>,
}

#[derive(Deserialize)]
struct MetadataFilter {
    key: Option<String>,
    value: Option<String>,
}

#[derive(Deserialize)]
struct InsertRequest {
    text: Option<String>,
    metadata: Option<BTreeMap<String, serde_json::Value>>,
    id: Option<String>,
}

#[derive(Deserialize)]
struct BatchRequest {
    documents: Option<Vec<InsertRequest>>,
}

#[derive(Deserialize)]
struct UpsertRequest {
    text: Option<String>,
    metadata: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct MetadataQuery {
    key: Option<String>,
    value: Option<String>,
}

impl MetadataQuery {
    fn filter(self) -> Option<(String, String)> {
        match (self.key, self.value) {
            (Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
                Some((key, value))
            }
            _ => None,
        }
    }
}

/// Metadata values must be strings; anything else keeps its JSON rendering.
fn coerce_metadata(raw: Option<BTreeMap<String, serde_json::Value>>) -> BTreeMap<String, String> {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

// ============ Handlers ============

async fn handle_health(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let (documents, index_size) =
        with_coordinator(&state, |c| Ok((c.document_count()?, c.index_size()))).await?;
    Ok(Json(json!({
        "status": "healthy",
        "documents": documents,
        "index_size": index_size,
    })))
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> std::result::Result<Json<Vec<SearchResult>>, ApiError> {
    let query = req.query.ok_or_else(|| bad_request("Missing 'query' field"))?;
    let k = req.k.unwrap_or(10);
    let threshold = req.threshold.unwrap_or(0.0);
    let ef_search = req.ef_search.unwrap_or(200);
    let search_type = req.search_type.unwrap_or_else(|| "semantic".to_string());
    let metadata = req.metadata;

    let results = with_coordinator(&state, move |c| {
        if let Some(filter) = metadata {
            return match (filter.key, filter.value) {
                (Some(key), Some(value)) => c.search_by_metadata(&key, &value, k),
                _ => Ok(Vec::new()),
            };
        }
        if search_type == "text" || search_type == "fulltext" {
            c.search_substring(&query, k, threshold)
        } else {
            c.search_text(&query, k, threshold, ef_search)
        }
    })
    .await?;
    Ok(Json(results))
}

async fn handle_insert(
    State(state): State<AppState>,
    Json(req): Json<InsertRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let text = req
        .text
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("Missing 'text' field"))?;
    let metadata = coerce_metadata(req.metadata);
    let custom_id = req.id;
    let index_path = Arc::clone(&state.index_path);

    let id = with_coordinator(&state, move |c| {
        let id = c.add_document(&text, &metadata, custom_id.as_deref())?;
        c.save_index(&index_path)?;
        Ok(id)
    })
    .await?;

    Ok(Json(json!({
        "id": id,
        "message": "Document inserted successfully",
    })))
}

async fn handle_batch_insert(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let entries = req
        .documents
        .ok_or_else(|| bad_request("Missing 'documents' array"))?;

    let mut docs = Vec::with_capacity(entries.len());
    for entry in entries {
        let text = entry
            .text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| bad_request("Each document must have 'text' field"))?;
        docs.push(NewDocument {
            text,
            metadata: coerce_metadata(entry.metadata),
            custom_id: entry.id,
        });
    }

    let index_path = Arc::clone(&state.index_path);
    let count = with_coordinator(&state, move |c| {
        let ids = c.add_documents(&docs)?;
        c.save_index(&index_path)?;
        Ok(ids.len())
    })
    .await?;

    Ok(Json(json!({
        "count": count,
        "message": "Documents inserted successfully",
    })))
}

async fn handle_upsert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpsertRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let text = req
        .text
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("Missing 'text' field"))?;
    let metadata = coerce_metadata(req.metadata);
    let index_path = Arc::clone(&state.index_path);

    let doc_id = id.clone();
    with_coordinator(&state, move |c| {
        c.upsert_document(&doc_id, &text, &metadata)?;
        c.save_index(&index_path)?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({
        "id": id,
        "message": "Document upserted successfully",
    })))
}

async fn handle_get_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Document>, ApiError> {
    let doc_id = id.clone();
    let doc = with_coordinator(&state, move |c| c.document(&doc_id)).await?;
    match doc {
        Some(doc) => Ok(Json(doc)),
        None => Err(ApiError(Error::NotFound(id))),
    }
}

async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> std::result::Result<Json<Vec<Document>>, ApiError> {
    let docs = with_coordinator(&state, move |c| match query.filter() {
        Some((key, value)) => c.documents_by_metadata(&key, &value),
        None => c.all_documents(),
    })
    .await?;
    Ok(Json(docs))
}

async fn handle_count(
    State(state): State<AppState>,
    Query(query): Query<MetadataQuery>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    match query.filter() {
        Some((key, value)) => {
            let (filter_key, filter_value) = (key.clone(), value.clone());
            let count =
                with_coordinator(&state, move |c| c.metadata_count(&key, &value)).await?;
            Ok(Json(json!({
                "count": count,
                "filter": { "key": filter_key, "value": filter_value },
            })))
        }
        None => {
            let count = with_coordinator(&state, |c| c.document_count()).await?;
            Ok(Json(json!({ "count": count })))
        }
    }
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let doc_id = id.clone();
    let index_path = Arc::clone(&state.index_path);
    let deleted = with_coordinator(&state, move |c| {
        let deleted = c.delete_document(&doc_id)?;
        if deleted {
            c.save_index(&index_path)?;
        }
        Ok(deleted)
    })
    .await?;

    if !deleted {
        return Err(ApiError(Error::NotFound(id)));
    }
    Ok(Json(json!({ "message": "Document deleted successfully" })))
}

async fn handle_rebuild(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let index_path = Arc::clone(&state.index_path);
    with_coordinator(&state, move |c| {
        c.rebuild()?;
        c.save_index(&index_path)?;
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "status": "success", "message": "Index rebuilt" })))
}

async fn handle_save(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let index_path = Arc::clone(&state.index_path);
    with_coordinator(&state, move |c| c.save_index(&index_path)).await?;
    Ok(Json(json!({ "status": "success", "message": "Index saved" })))
}
