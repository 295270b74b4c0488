//! HTTP surface: the Slack Events endpoint and the REST API over the core.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, DraftError};
use crate::knowledge::{DraftGenerator, KnowledgeUpdate, NewKnowledgeEntry};
use crate::pipeline::ingest::EventIngestor;
use crate::pipeline::types::{Category, MessageFilter, MessageUpdate};
use crate::slack::EventEnvelope;
use crate::store::{KnowledgeStore, MessageStore};

/// Default page size for `GET /api/messages`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<EventIngestor>,
    pub messages: Arc<dyn MessageStore>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub drafts: Arc<DraftGenerator>,
}

/// Build the Axum router with the events endpoint and REST routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/health", get(health))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/handle", patch(mark_handled))
        .route("/api/messages/{id}/flag", patch(flag_message))
        .route("/api/messages/{id}/category", patch(recategorize))
        .route("/api/messages/{id}/draft-response", post(draft_response))
        .route("/api/messages/{id}/thread", get(thread_replies))
        .route("/api/stats", get(stats))
        .route("/api/knowledge", get(list_knowledge).post(create_knowledge))
        .route(
            "/api/knowledge/{id}",
            get(get_knowledge)
                .patch(update_knowledge)
                .delete(delete_knowledge),
        )
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache", axum::routing::delete(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

fn db_error(op: &str, e: DatabaseError) -> Response {
    error!(op, error = %e, "Database operation failed");
    match e {
        DatabaseError::Constraint(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        DatabaseError::NotFound { entity, id } => {
            error_response(StatusCode::NOT_FOUND, format!("{entity} {id} not found"))
        }
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn message_not_found(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Message {id} not found"))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "triage-assist",
        "ai": state.drafts.is_enabled(),
        "botUserId": state.ingestor.bot_user_id().await,
    }))
}

// ── Slack Events ────────────────────────────────────────────────────────

/// Answers the URL challenge inline; callbacks are acknowledged at once and
/// processed in the background.
async fn slack_events(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let envelope: EventEnvelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed Events API payload");
            return error_response(StatusCode::BAD_REQUEST, "Malformed event payload");
        }
    };

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            info!("Slack URL verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        EventEnvelope::EventCallback { event_id, event } => {
            debug!(event_id = ?event_id, "Event callback received");
            let ingestor = Arc::clone(&state.ingestor);
            tokio::spawn(async move {
                ingestor.ingest_callback(&event).await;
            });
            Json(json!({ "ok": true })).into_response()
        }
        EventEnvelope::Unknown => {
            debug!("Ignoring unknown envelope type");
            Json(json!({ "ok": true })).into_response()
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListQuery {
    category: Option<String>,
    handled: Option<bool>,
    needs_response: Option<bool>,
    include_deleted: Option<bool>,
    limit: Option<usize>,
}

async fn list_messages(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    let category = match q.category.as_deref().map(str::parse::<Category>) {
        Some(Ok(c)) => Some(c),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e),
        None => None,
    };
    let filter = MessageFilter {
        category,
        handled: q.handled,
        needs_response: q.needs_response,
        include_deleted: q.include_deleted.unwrap_or(false),
        limit: Some(q.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };

    match state.messages.query(&filter).await {
        Ok(messages) => Json(json!({
            "success": true,
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => db_error("list_messages", e),
    }
}

async fn get_message(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.messages.get(&id).await {
        Ok(Some(message)) => Json(json!({ "success": true, "message": message })).into_response(),
        Ok(None) => message_not_found(&id),
        Err(e) => db_error("get_message", e),
    }
}

async fn apply_update(state: &AppState, id: &str, update: MessageUpdate) -> Response {
    match state.messages.update(id, &update).await {
        Ok(Some(message)) => {
            info!(id = %id, update = ?update, "Message updated via API");
            Json(json!({ "success": true, "message": message })).into_response()
        }
        Ok(None) => message_not_found(id),
        Err(e) => db_error("update_message", e),
    }
}

#[derive(Debug, Deserialize)]
struct HandleBody {
    #[serde(default = "default_true")]
    handled: bool,
}

fn default_true() -> bool {
    true
}

/// PATCH /api/messages/{id}/handle. An empty body marks the message handled.
async fn mark_handled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<HandleBody>>,
) -> Response {
    let handled = body.map(|Json(b)| b.handled).unwrap_or(true);
    apply_update(&state, &id, MessageUpdate::handled(handled)).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FlagBody {
    needs_response: Option<bool>,
}

/// PATCH /api/messages/{id}/flag. Toggles `needs_response` unless a value
/// is given.
async fn flag_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FlagBody>>,
) -> Response {
    let requested = body.and_then(|Json(b)| b.needs_response);
    let needs_response = match requested {
        Some(value) => value,
        None => match state.messages.get(&id).await {
            Ok(Some(message)) => !message.needs_response,
            Ok(None) => return message_not_found(&id),
            Err(e) => return db_error("flag_message", e),
        },
    };
    apply_update(&state, &id, MessageUpdate::needs_response(needs_response)).await
}

#[derive(Debug, Deserialize)]
struct CategoryBody {
    category: String,
}

async fn recategorize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CategoryBody>,
) -> Response {
    match body.category.parse::<Category>() {
        Ok(category) => apply_update(&state, &id, MessageUpdate::category(category)).await,
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn draft_response(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let message = match state.messages.get(&id).await {
        Ok(Some(message)) => message,
        Ok(None) => return message_not_found(&id),
        Err(e) => return db_error("draft_response", e),
    };

    match state.drafts.generate_draft(&message, &[]).await {
        Ok(draft) => Json(json!({ "success": true, "draft": draft })).into_response(),
        Err(DraftError::NotConfigured) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, DraftError::NotConfigured.to_string())
        }
        Err(e) => {
            warn!(id = %id, error = %e, "Draft generation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/messages/{id}/thread. Replies of the thread the message
/// belongs to, or started.
async fn thread_replies(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let message = match state.messages.get(&id).await {
        Ok(Some(message)) => message,
        Ok(None) => return message_not_found(&id),
        Err(e) => return db_error("thread_replies", e),
    };
    let thread_ts = message
        .metadata
        .thread_ts
        .clone()
        .unwrap_or_else(|| message.id.clone());

    match state
        .ingestor
        .source()
        .fetch_thread_replies(&message.channel.id, &thread_ts)
        .await
    {
        Ok(replies) => Json(json!({
            "success": true,
            "count": replies.len(),
            "replies": replies,
        }))
        .into_response(),
        Err(e) => {
            warn!(id = %id, error = %e, "Thread fetch failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn stats(State(state): State<AppState>) -> Response {
    match state.messages.stats().await {
        Ok(stats) => Json(json!({ "success": true, "stats": stats })).into_response(),
        Err(e) => db_error("stats", e),
    }
}

// ── Knowledge base ──────────────────────────────────────────────────────

async fn list_knowledge(State(state): State<AppState>) -> Response {
    match state.knowledge.list_entries().await {
        Ok(entries) => Json(json!({
            "success": true,
            "count": entries.len(),
            "entries": entries,
        }))
        .into_response(),
        Err(e) => db_error("list_knowledge", e),
    }
}

async fn create_knowledge(
    State(state): State<AppState>,
    Json(body): Json<NewKnowledgeEntry>,
) -> Response {
    if let Err(msg) = body.validate() {
        return error_response(StatusCode::BAD_REQUEST, msg);
    }
    match state.knowledge.create_entry(body).await {
        Ok(entry) => {
            info!(id = %entry.id, "Knowledge entry created via API");
            (
                StatusCode::CREATED,
                Json(json!({ "success": true, "entry": entry })),
            )
                .into_response()
        }
        Err(e) => db_error("create_knowledge", e),
    }
}

fn entry_not_found(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Knowledge entry {id} not found"))
}

async fn get_knowledge(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.knowledge.get_entry(&id).await {
        Ok(Some(entry)) => Json(json!({ "success": true, "entry": entry })).into_response(),
        Ok(None) => entry_not_found(&id),
        Err(e) => db_error("get_knowledge", e),
    }
}

async fn update_knowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<KnowledgeUpdate>,
) -> Response {
    match state.knowledge.update_entry(&id, body).await {
        Ok(Some(entry)) => Json(json!({ "success": true, "entry": entry })).into_response(),
        Ok(None) => entry_not_found(&id),
        Err(e) => db_error("update_knowledge", e),
    }
}

async fn delete_knowledge(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.knowledge.delete_entry(&id).await {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => entry_not_found(&id),
        Err(e) => db_error("delete_knowledge", e),
    }
}

// ── Identity cache ──────────────────────────────────────────────────────

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.ingestor.identities().stats().await;
    Json(json!({ "success": true, "cache": stats }))
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    state.ingestor.identities().clear().await;
    info!("Identity cache cleared");
    Json(json!({ "success": true }))
}
