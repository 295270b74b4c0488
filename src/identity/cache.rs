//! Process-lifetime memo of user lookups.
//!
//! Each key maps to a `OnceCell`: the first caller runs the lookup and every
//! concurrent caller for the same key awaits that same initialization, so a
//! user is looked up at most once per process. Failures are cached as an
//! "Unknown User" placeholder and never retried. Nothing is evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::slack::{IdentitySource, UserInfo};

/// Name used for users whose lookup failed.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Cached resolution of a user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub real_name: String,
    pub display_name: String,
}

impl IdentityRecord {
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: UNKNOWN_USER.to_string(),
            real_name: UNKNOWN_USER.to_string(),
            display_name: UNKNOWN_USER.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == UNKNOWN_USER
    }
}

impl From<UserInfo> for IdentityRecord {
    fn from(user: UserInfo) -> Self {
        Self {
            id: user.id,
            name: user.name,
            real_name: user.real_name,
            display_name: user.display_name,
        }
    }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub users: Vec<String>,
}

/// Identity cache shared by every component that resolves users.
pub struct IdentityCache {
    source: Arc<dyn IdentitySource>,
    entries: Mutex<HashMap<String, Arc<OnceCell<IdentityRecord>>>>,
    lookup_timeout: Duration,
}

impl IdentityCache {
    pub fn new(source: Arc<dyn IdentitySource>, lookup_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            entries: Mutex::new(HashMap::new()),
            lookup_timeout,
        })
    }

    /// Resolve a user reference, looking it up at most once per process.
    pub async fn resolve(&self, user_ref: &str) -> IdentityRecord {
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(
                entries
                    .entry(user_ref.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        if let Some(record) = cell.get() {
            return record.clone();
        }

        cell.get_or_init(|| self.fetch(user_ref)).await.clone()
    }

    async fn fetch(&self, user_ref: &str) -> IdentityRecord {
        match tokio::time::timeout(self.lookup_timeout, self.source.lookup_user(user_ref)).await {
            Ok(Ok(user)) => {
                debug!(user = user_ref, name = %user.name, "Identity resolved");
                IdentityRecord::from(user)
            }
            Ok(Err(e)) => {
                warn!(user = user_ref, error = %e, "Identity lookup failed, caching placeholder");
                IdentityRecord::placeholder(user_ref)
            }
            Err(_) => {
                warn!(
                    user = user_ref,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Identity lookup timed out, caching placeholder"
                );
                IdentityRecord::placeholder(user_ref)
            }
        }
    }

    /// Drop every cached record. Only meant for tests and manual resets.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        debug!(count, "Identity cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        let mut users: Vec<String> = entries
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        users.sort();
        CacheStats {
            size: users.len(),
            users,
        }
    }
}
