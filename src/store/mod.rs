//! Persistence layer: libSQL-backed storage for messages and the knowledge base.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{KnowledgeStore, MessageStore, STATS_WINDOW};
