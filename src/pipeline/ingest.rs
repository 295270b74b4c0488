//! Event ingestion: raw platform events in, persisted messages out.
//!
//! Flow per event:
//! 1. Self-check (drop the bot's own messages)
//! 2. Subtype routing: `message_deleted` soft-deletes, other subtypes except
//!    `file_share` are dropped
//! 3. Resolve author and channel concurrently
//! 4. Resolve mentions, assemble metadata, classify
//! 5. Upsert; persistence failures are logged, never raised
//!
//! Each event produces at most one persisted effect.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::identity::{IdentityCache, MentionResolver};
use crate::pipeline::classifier::AiClassifier;
use crate::pipeline::types::{Message, MessageMetadata};
use crate::slack::events::parse_ts;
use crate::slack::{ChannelInfo, IdentitySource, MessageEvent};
use crate::store::MessageStore;

const SUBTYPE_DELETED: &str = "message_deleted";
const SUBTYPE_FILE_SHARE: &str = "file_share";

/// Ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bound on channel and bot-identity lookups.
    pub lookup_timeout: Duration,
    pub init_attempts: u32,
    /// Base delay between initialization attempts; grows linearly. Also the
    /// minimum gap between lazy retries while the identity is unknown.
    pub init_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(5),
            init_attempts: 3,
            init_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Why an event produced no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not a `message` or `app_mention` event.
    UnsupportedEvent,
    OwnMessage,
    IgnoredSubtype(String),
    MissingDeleteTarget,
    UnknownDeleteTarget(String),
    DeleteFailed(String),
    MissingField(&'static str),
    InvalidTimestamp(String),
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnsupportedEvent => "unsupported_event",
            Self::OwnMessage => "own_message",
            Self::IgnoredSubtype(_) => "ignored_subtype",
            Self::MissingDeleteTarget => "missing_delete_target",
            Self::UnknownDeleteTarget(_) => "unknown_delete_target",
            Self::DeleteFailed(_) => "delete_failed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
        }
    }
}

/// Terminal outcome of one event.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Dropped(DropReason),
    SoftDeleted(String),
    Ingested(Message),
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dropped(_) => "dropped",
            Self::SoftDeleted(_) => "soft_deleted",
            Self::Ingested(_) => "ingested",
        }
    }
}

/// Turns raw events into classified, persisted messages.
pub struct EventIngestor {
    source: Arc<dyn IdentitySource>,
    identities: Arc<IdentityCache>,
    mentions: MentionResolver,
    classifier: AiClassifier,
    store: Arc<dyn MessageStore>,
    bot_user_id: RwLock<Option<String>>,
    /// Last lazy `auth_identity` attempt made from the event path.
    last_identity_retry: Mutex<Option<Instant>>,
    identity_warned: AtomicBool,
    config: IngestConfig,
}

impl EventIngestor {
    pub fn new(
        source: Arc<dyn IdentitySource>,
        identities: Arc<IdentityCache>,
        classifier: AiClassifier,
        store: Arc<dyn MessageStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            mentions: MentionResolver::new(Arc::clone(&identities)),
            identities,
            classifier,
            store,
            bot_user_id: RwLock::new(None),
            last_identity_retry: Mutex::new(None),
            identity_warned: AtomicBool::new(false),
            config,
        }
    }

    pub fn identities(&self) -> &Arc<IdentityCache> {
        &self.identities
    }

    pub fn source(&self) -> &Arc<dyn IdentitySource> {
        &self.source
    }

    pub async fn bot_user_id(&self) -> Option<String> {
        self.bot_user_id.read().await.clone()
    }

    /// Resolve the bot's own identity, retrying a bounded number of times.
    pub async fn initialize(&self) -> Result<String, PipelineError> {
        let attempts = self.config.init_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let lookup =
                tokio::time::timeout(self.config.lookup_timeout, self.source.auth_identity()).await;
            match lookup {
                Ok(Ok(bot_id)) => {
                    info!(bot_user_id = %bot_id, attempt, "Bot identity initialized");
                    *self.bot_user_id.write().await = Some(bot_id.clone());
                    return Ok(bot_id);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", self.config.lookup_timeout),
            }

            warn!(attempt, attempts, error = %last_error, "Bot identity lookup failed");
            if attempt < attempts {
                tokio::time::sleep(self.config.init_retry_delay * attempt).await;
            }
        }

        Err(PipelineError::BotIdentity {
            attempts,
            reason: last_error,
        })
    }

    /// Ingest the inner event of an `event_callback`.
    pub async fn ingest_callback(&self, event: &serde_json::Value) -> IngestOutcome {
        match MessageEvent::from_callback(event) {
            Some(event) => self.ingest(event).await,
            None => {
                debug!(
                    event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("?"),
                    "Skipping unsupported event"
                );
                IngestOutcome::Dropped(DropReason::UnsupportedEvent)
            }
        }
    }

    /// Ingest one message event.
    pub async fn ingest(&self, event: MessageEvent) -> IngestOutcome {
        let outcome = self.route(event).await;
        match &outcome {
            IngestOutcome::Dropped(reason) => {
                debug!(reason = reason.label(), detail = ?reason, "Event dropped");
            }
            IngestOutcome::SoftDeleted(id) => info!(id = %id, "Message soft-deleted"),
            IngestOutcome::Ingested(message) => info!(
                id = %message.id,
                channel = %message.channel.name,
                category = %message.category,
                priority = message.priority,
                "Message ingested"
            ),
        }
        outcome
    }

    /// The bot identity, retrying `auth_identity` at most once per
    /// `init_retry_delay` while it is unknown. Concurrent events do not wait
    /// on an in-flight retry.
    async fn ensure_bot_identity(&self) -> Option<String> {
        if let Some(bot_id) = self.bot_user_id().await {
            return Some(bot_id);
        }

        let Ok(mut last) = self.last_identity_retry.try_lock() else {
            return None;
        };
        if last.is_some_and(|at| at.elapsed() < self.config.init_retry_delay) {
            return None;
        }
        *last = Some(Instant::now());

        match tokio::time::timeout(self.config.lookup_timeout, self.source.auth_identity()).await {
            Ok(Ok(bot_id)) => {
                info!(bot_user_id = %bot_id, "Bot identity recovered");
                *self.bot_user_id.write().await = Some(bot_id.clone());
                Some(bot_id)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Bot identity retry failed");
                None
            }
            Err(_) => {
                debug!(timeout = ?self.config.lookup_timeout, "Bot identity retry timed out");
                None
            }
        }
    }

    async fn route(&self, event: MessageEvent) -> IngestOutcome {
        let bot_user_id = self.ensure_bot_identity().await;
        match (&bot_user_id, &event.user) {
            (Some(bot), Some(user)) if bot == user => {
                return IngestOutcome::Dropped(DropReason::OwnMessage);
            }
            (None, _) => {
                if !self.identity_warned.swap(true, Ordering::Relaxed) {
                    warn!("Bot identity unknown, self-check and mention detection disabled");
                } else {
                    debug!("Bot identity still unknown");
                }
            }
            _ => {}
        }

        let subtype = event.subtype.clone();
        match subtype.as_deref() {
            Some(SUBTYPE_DELETED) => self.handle_deletion(&event).await,
            None | Some(SUBTYPE_FILE_SHARE) => self.handle_message(event, bot_user_id).await,
            Some(other) => IngestOutcome::Dropped(DropReason::IgnoredSubtype(other.to_string())),
        }
    }

    async fn handle_deletion(&self, event: &MessageEvent) -> IngestOutcome {
        let Some(id) = event.deleted_message_id() else {
            warn!(channel = ?event.channel, "Deletion event without a message id");
            return IngestOutcome::Dropped(DropReason::MissingDeleteTarget);
        };

        match self.store.soft_delete(id).await {
            Ok(true) => IngestOutcome::SoftDeleted(id.to_string()),
            Ok(false) => IngestOutcome::Dropped(DropReason::UnknownDeleteTarget(id.to_string())),
            Err(e) => {
                error!(id = %id, error = %e, "Failed to soft-delete message");
                IngestOutcome::Dropped(DropReason::DeleteFailed(e.to_string()))
            }
        }
    }

    async fn handle_message(
        &self,
        event: MessageEvent,
        bot_user_id: Option<String>,
    ) -> IngestOutcome {
        let Some(user_ref) = event.user.as_deref() else {
            return IngestOutcome::Dropped(DropReason::MissingField("user"));
        };
        let Some(channel_ref) = event.channel.as_deref() else {
            return IngestOutcome::Dropped(DropReason::MissingField("channel"));
        };
        let Some(ts) = event.ts.as_deref() else {
            return IngestOutcome::Dropped(DropReason::MissingField("ts"));
        };
        let Some(timestamp) = parse_ts(ts) else {
            return IngestOutcome::Dropped(DropReason::InvalidTimestamp(ts.to_string()));
        };

        let (user, channel) = tokio::join!(
            self.identities.resolve(user_ref),
            self.lookup_channel(channel_ref)
        );

        let original_text = match event.text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => event.file_placeholder().unwrap_or_default(),
        };
        let resolved = self.mentions.resolve(&original_text).await;

        let mentions_user = event.kind == "app_mention"
            || bot_user_id
                .as_deref()
                .is_some_and(|bot| original_text.contains(&format!("<@{bot}>")));

        let metadata = MessageMetadata {
            thread_ts: event.thread_ts.clone(),
            has_attachments: !event.files.is_empty(),
            mentions_user,
            mentioned_users: resolved.users.into_iter().collect::<BTreeMap<_, _>>(),
            subtype: event.subtype.clone(),
            ..Default::default()
        };

        let mut message = Message::new(
            ts,
            channel,
            user,
            resolved.text,
            original_text,
            timestamp,
            metadata,
        );

        let classification = self.classifier.classify(&message).await;
        message.apply_classification(&classification);

        if let Err(e) = self.store.create(&message).await {
            error!(id = %message.id, error = %e, "Failed to persist message");
        }

        IngestOutcome::Ingested(message)
    }

    async fn lookup_channel(&self, channel_ref: &str) -> ChannelInfo {
        match tokio::time::timeout(
            self.config.lookup_timeout,
            self.source.lookup_channel(channel_ref),
        )
        .await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!(channel = channel_ref, error = %e, "Channel lookup failed");
                ChannelInfo::unknown(channel_ref)
            }
            Err(_) => {
                warn!(channel = channel_ref, "Channel lookup timed out");
                ChannelInfo::unknown(channel_ref)
            }
        }
    }
}
