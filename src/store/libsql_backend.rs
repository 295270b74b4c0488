//! libSQL backend implementing `MessageStore` and `KnowledgeStore`.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so text ordering matches time
//! ordering.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::identity::IdentityRecord;
use crate::knowledge::{KnowledgeEntry, KnowledgeUpdate, NewKnowledgeEntry};
use crate::pipeline::types::{Category, Message, MessageFilter, MessageMetadata, MessageUpdate};
use crate::slack::{ChannelInfo, ChannelKind};
use crate::store::migrations;
use crate::store::traits::{KnowledgeStore, MessageStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn fetch_messages(
        &self,
        sql: &str,
        values: Vec<Value>,
        op: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_message(&row) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => warn!("Skipping message row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(messages)
    }

    async fn fetch_entries(
        &self,
        sql: &str,
        values: Vec<Value>,
        op: &str,
    ) -> Result<Vec<KnowledgeEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut entries = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_entry(&row) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("Skipping knowledge row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(entries)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, channel_id, channel_name, channel_kind, user_id, user_name, \
     user_real_name, user_display_name, text, original_text, timestamp, category, ai_category, \
     priority, needs_response, handled, handled_at, deleted, deleted_at, metadata, created_at, \
     updated_at";

const KNOWLEDGE_COLUMNS: &str = "id, question, answer, keywords, use_count, created_at, updated_at";

fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_datetime(dt: &Option<DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(fmt_datetime(dt)),
        None => Value::Null,
    }
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn bool_value(b: bool) -> Value {
    Value::Integer(b as i64)
}

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let kind_str: String = row.get(3)?;
    let timestamp_str: String = row.get(10)?;
    let category_str: String = row.get(11)?;
    let ai_category_str: Option<String> = row.get(12).ok();
    let handled_at: Option<String> = row.get(16).ok();
    let deleted_at: Option<String> = row.get(18).ok();
    let metadata_str: String = row.get(19)?;
    let created_str: String = row.get(20)?;
    let updated_str: String = row.get(21)?;

    let metadata: MessageMetadata = serde_json::from_str(&metadata_str).unwrap_or_else(|e| {
        warn!(error = %e, "Unreadable message metadata, using defaults");
        MessageMetadata::default()
    });

    Ok(Message {
        id: row.get(0)?,
        channel: ChannelInfo {
            id: row.get(1)?,
            name: row.get(2)?,
            kind: ChannelKind::parse(&kind_str),
        },
        user: IdentityRecord {
            id: row.get(4)?,
            name: row.get(5)?,
            real_name: row.get(6)?,
            display_name: row.get(7)?,
        },
        text: row.get(8)?,
        original_text: row.get(9)?,
        timestamp: parse_datetime(&timestamp_str),
        category: category_str.parse().unwrap_or(Category::Routine),
        ai_category: ai_category_str.and_then(|c| c.parse().ok()),
        priority: row.get::<i64>(13)?.clamp(0, 100) as u8,
        needs_response: row.get::<i64>(14)? != 0,
        handled: row.get::<i64>(15)? != 0,
        handled_at: parse_optional_datetime(&handled_at),
        deleted: row.get::<i64>(17)? != 0,
        deleted_at: parse_optional_datetime(&deleted_at),
        metadata,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a KnowledgeEntry. Column order matches KNOWLEDGE_COLUMNS.
fn row_to_entry(row: &libsql::Row) -> Result<KnowledgeEntry, libsql::Error> {
    let keywords_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(KnowledgeEntry {
        id: row.get(0)?,
        question: row.get(1)?,
        answer: row.get(2)?,
        keywords: serde_json::from_str(&keywords_str).unwrap_or_default(),
        use_count: row.get::<i64>(4)?.max(0) as u64,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

// ── Messages ────────────────────────────────────────────────────────

#[async_trait]
impl MessageStore for LibSqlBackend {
    async fn create(&self, message: &Message) -> Result<(), DatabaseError> {
        let metadata = to_json(&message.metadata)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22)
                     ON CONFLICT(id) DO UPDATE SET
                        channel_id = excluded.channel_id,
                        channel_name = excluded.channel_name,
                        channel_kind = excluded.channel_kind,
                        user_id = excluded.user_id,
                        user_name = excluded.user_name,
                        user_real_name = excluded.user_real_name,
                        user_display_name = excluded.user_display_name,
                        text = excluded.text,
                        original_text = excluded.original_text,
                        timestamp = excluded.timestamp,
                        category = excluded.category,
                        ai_category = excluded.ai_category,
                        priority = excluded.priority,
                        needs_response = excluded.needs_response,
                        metadata = excluded.metadata,
                        updated_at = excluded.updated_at"
                ),
                Params::Positional(vec![
                    Value::Text(message.id.clone()),
                    Value::Text(message.channel.id.clone()),
                    Value::Text(message.channel.name.clone()),
                    Value::Text(message.channel.kind.as_str().to_string()),
                    Value::Text(message.user.id.clone()),
                    Value::Text(message.user.name.clone()),
                    Value::Text(message.user.real_name.clone()),
                    Value::Text(message.user.display_name.clone()),
                    Value::Text(message.text.clone()),
                    Value::Text(message.original_text.clone()),
                    Value::Text(fmt_datetime(&message.timestamp)),
                    Value::Text(message.category.to_string()),
                    opt_text(message.ai_category.as_ref().map(Category::as_str)),
                    Value::Integer(message.priority as i64),
                    bool_value(message.needs_response),
                    bool_value(message.handled),
                    opt_datetime(&message.handled_at),
                    bool_value(message.deleted),
                    opt_datetime(&message.deleted_at),
                    Value::Text(metadata),
                    Value::Text(fmt_datetime(&message.created_at)),
                    Value::Text(fmt_datetime(&message.updated_at)),
                ]),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_message: {e}")))?;

        debug!(id = %message.id, category = %message.category, "Message upserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Message>, DatabaseError> {
        let mut found = self
            .fetch_messages(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                vec![Value::Text(id.to_string())],
                "get_message",
            )
            .await?;
        Ok(found.pop())
    }

    async fn update(
        &self,
        id: &str,
        update: &MessageUpdate,
    ) -> Result<Option<Message>, DatabaseError> {
        let Some(mut message) = self.get(id).await? else {
            return Ok(None);
        };
        message.apply_update(update, Utc::now());

        self.conn()
            .execute(
                "UPDATE messages SET category = ?1, priority = ?2, needs_response = ?3,
                    handled = ?4, handled_at = ?5, updated_at = ?6
                 WHERE id = ?7",
                Params::Positional(vec![
                    Value::Text(message.category.to_string()),
                    Value::Integer(message.priority as i64),
                    bool_value(message.needs_response),
                    bool_value(message.handled),
                    opt_datetime(&message.handled_at),
                    Value::Text(fmt_datetime(&message.updated_at)),
                    Value::Text(id.to_string()),
                ]),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message: {e}")))?;

        debug!(id = id, update = ?update, "Message updated");
        Ok(Some(message))
    }

    async fn soft_delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let now = fmt_datetime(&Utc::now());
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET deleted = 1, deleted_at = COALESCE(deleted_at, ?1),
                    updated_at = ?1
                 WHERE id = ?2",
                params![now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("soft_delete_message: {e}")))?;
        Ok(count > 0)
    }

    async fn query(&self, filter: &MessageFilter) -> Result<Vec<Message>, DatabaseError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.include_deleted {
            clauses.push("deleted = 0".to_string());
        }
        if let Some(category) = filter.category {
            values.push(Value::Text(category.to_string()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        if let Some(handled) = filter.handled {
            values.push(bool_value(handled));
            clauses.push(format!("handled = ?{}", values.len()));
        }
        if let Some(needs_response) = filter.needs_response {
            values.push(bool_value(needs_response));
            clauses.push(format!("needs_response = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = filter.limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        self.fetch_messages(&sql, values, "query_messages").await
    }
}

// ── Knowledge base ──────────────────────────────────────────────────

#[async_trait]
impl KnowledgeStore for LibSqlBackend {
    async fn create_entry(
        &self,
        entry: NewKnowledgeEntry,
    ) -> Result<KnowledgeEntry, DatabaseError> {
        entry.validate().map_err(DatabaseError::Constraint)?;

        let now = Utc::now();
        let created = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            question: entry.question.trim().to_string(),
            answer: entry.answer.trim().to_string(),
            keywords: normalize_keywords(entry.keywords),
            use_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO knowledge_entries ({KNOWLEDGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)"
                ),
                params![
                    created.id.clone(),
                    created.question.clone(),
                    created.answer.clone(),
                    to_json(&created.keywords)?,
                    fmt_datetime(&now),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_entry: {e}")))?;

        debug!(id = %created.id, "Knowledge entry created");
        Ok(created)
    }

    async fn list_entries(&self) -> Result<Vec<KnowledgeEntry>, DatabaseError> {
        self.fetch_entries(
            &format!(
                "SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_entries
                 ORDER BY use_count DESC, created_at DESC"
            ),
            Vec::new(),
            "list_entries",
        )
        .await
    }

    async fn get_entry(&self, id: &str) -> Result<Option<KnowledgeEntry>, DatabaseError> {
        let mut found = self
            .fetch_entries(
                &format!("SELECT {KNOWLEDGE_COLUMNS} FROM knowledge_entries WHERE id = ?1"),
                vec![Value::Text(id.to_string())],
                "get_entry",
            )
            .await?;
        Ok(found.pop())
    }

    async fn update_entry(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, DatabaseError> {
        let Some(mut entry) = self.get_entry(id).await? else {
            return Ok(None);
        };

        if let Some(question) = update.question {
            entry.question = question.trim().to_string();
        }
        if let Some(answer) = update.answer {
            entry.answer = answer.trim().to_string();
        }
        if let Some(keywords) = update.keywords {
            entry.keywords = normalize_keywords(keywords);
        }
        if entry.question.is_empty() || entry.answer.is_empty() {
            return Err(DatabaseError::Constraint(
                "Question and answer are required".to_string(),
            ));
        }
        entry.updated_at = Utc::now();

        self.conn()
            .execute(
                "UPDATE knowledge_entries SET question = ?1, answer = ?2, keywords = ?3,
                    updated_at = ?4
                 WHERE id = ?5",
                params![
                    entry.question.clone(),
                    entry.answer.clone(),
                    to_json(&entry.keywords)?,
                    fmt_datetime(&entry.updated_at),
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_entry: {e}")))?;

        Ok(Some(entry))
    }

    async fn delete_entry(&self, id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM knowledge_entries WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_entry: {e}")))?;
        Ok(count > 0)
    }

    async fn search(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, DatabaseError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.list_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.matches(keywords))
            .collect())
    }

    async fn increment_use_count(&self, id: &str) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE knowledge_entries SET use_count = use_count + 1 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_use_count: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "knowledge_entry".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}
