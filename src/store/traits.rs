//! Persistence traits consumed by the core.
//!
//! `LibSqlBackend` implements both; tests may substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::knowledge::{KnowledgeEntry, KnowledgeUpdate, NewKnowledgeEntry};
use crate::pipeline::types::{Message, MessageFilter, MessageStats, MessageUpdate};

/// Window used by `MessageStore::stats`.
pub const STATS_WINDOW: usize = 1000;

/// Message persistence. Messages are keyed by their platform id and are
/// never removed, only soft-deleted.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace by id (last writer wins). Lifecycle flags already
    /// set on a stored message (handled, deleted) are kept.
    async fn create(&self, message: &Message) -> Result<(), DatabaseError>;

    /// Get a message by id, including soft-deleted ones.
    async fn get(&self, id: &str) -> Result<Option<Message>, DatabaseError>;

    /// Apply a lifecycle update. Returns the updated message, or `None` if
    /// no message has this id.
    async fn update(
        &self,
        id: &str,
        update: &MessageUpdate,
    ) -> Result<Option<Message>, DatabaseError>;

    /// Mark a message deleted. Returns `false` if no message has this id.
    async fn soft_delete(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Query messages, most recent `timestamp` first.
    async fn query(&self, filter: &MessageFilter) -> Result<Vec<Message>, DatabaseError>;

    /// Counts over the most recent non-deleted messages.
    async fn stats(&self) -> Result<MessageStats, DatabaseError> {
        let recent = self
            .query(&MessageFilter {
                limit: Some(STATS_WINDOW),
                ..Default::default()
            })
            .await?;
        Ok(MessageStats::from_messages(&recent))
    }
}

/// Knowledge base persistence.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_entry(&self, entry: NewKnowledgeEntry)
    -> Result<KnowledgeEntry, DatabaseError>;

    /// All entries, most used first.
    async fn list_entries(&self) -> Result<Vec<KnowledgeEntry>, DatabaseError>;

    async fn get_entry(&self, id: &str) -> Result<Option<KnowledgeEntry>, DatabaseError>;

    async fn update_entry(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, DatabaseError>;

    /// Returns `false` if no entry has this id.
    async fn delete_entry(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Entries matching any keyword. Order is unspecified.
    async fn search(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, DatabaseError>;

    /// Record that an entry was used in a draft.
    async fn increment_use_count(&self, id: &str) -> Result<(), DatabaseError>;
}
