//! Shared types for the message triage pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityRecord;
use crate::slack::ChannelInfo;

// ── Category ────────────────────────────────────────────────────────

/// Urgency bucket assigned to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Urgent,
    Question,
    Fyi,
    Routine,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Urgent,
        Category::Question,
        Category::Fyi,
        Category::Routine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Question => "question",
            Self::Fyi => "fyi",
            Self::Routine => "routine",
        }
    }

    /// Exact lowercase match only. Model output must name a category
    /// verbatim; `FromStr` is the lenient form for user input.
    pub fn parse_exact(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "question" => Ok(Self::Question),
            "fyi" => Ok(Self::Fyi),
            "routine" => Ok(Self::Routine),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Which classifier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationSource {
    #[serde(rename = "rule-based")]
    RuleBased,
    #[serde(rename = "ai")]
    Ai,
}

impl ClassificationSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule-based",
            Self::Ai => "ai",
        }
    }
}

/// Output of a single classification call. Merged into a `Message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub category: Category,
    /// 0–100.
    pub priority: u8,
    pub needs_response: bool,
    /// 0.0–1.0.
    pub confidence: f32,
    pub source: ClassificationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Clamp an arbitrary integer priority into `0..=100`.
pub fn clamp_priority(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

// ── Message ─────────────────────────────────────────────────────────

/// Structured facts about a message gathered at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    pub thread_ts: Option<String>,
    pub has_attachments: bool,
    /// The bot (recipient) was mentioned.
    pub mentions_user: bool,
    /// Every identity substituted into the text, keyed by user reference.
    pub mentioned_users: BTreeMap<String, IdentityRecord>,
    pub subtype: Option<String>,
    pub classified_by: Option<ClassificationSource>,
    pub confidence: Option<f32>,
    pub reasoning: Option<String>,
}

impl MessageMetadata {
    pub fn in_thread(&self) -> bool {
        self.thread_ts.is_some()
    }
}

/// Canonical unit of work. `id` is the platform `ts` and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub channel: ChannelInfo,
    pub user: IdentityRecord,
    /// Mention-resolved text.
    pub text: String,
    pub original_text: String,
    /// When the event happened on the platform.
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Raw classifier output; survives manual recategorization.
    pub ai_category: Option<Category>,
    pub priority: u8,
    pub needs_response: bool,
    pub handled: bool,
    pub handled_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// New unclassified message. Starts as routine until a classification
    /// is applied.
    pub fn new(
        id: impl Into<String>,
        channel: ChannelInfo,
        user: IdentityRecord,
        text: impl Into<String>,
        original_text: impl Into<String>,
        timestamp: DateTime<Utc>,
        metadata: MessageMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            channel,
            user,
            text: text.into(),
            original_text: original_text.into(),
            timestamp,
            category: Category::Routine,
            ai_category: None,
            priority: 30,
            needs_response: false,
            handled: false,
            handled_at: None,
            deleted: false,
            deleted_at: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a classification into the message.
    pub fn apply_classification(&mut self, result: &ClassificationResult) {
        self.category = result.category;
        self.ai_category = Some(result.category);
        self.priority = result.priority;
        self.needs_response = result.needs_response;
        self.metadata.classified_by = Some(result.source);
        self.metadata.confidence = Some(result.confidence);
        self.metadata.reasoning = result.reasoning.clone();
    }

    /// Apply a lifecycle update. Only fields set in `update` change.
    pub fn apply_update(&mut self, update: &MessageUpdate, now: DateTime<Utc>) {
        if let Some(handled) = update.handled {
            self.handled = handled;
            self.handled_at = if handled { Some(now) } else { None };
        }
        if let Some(needs_response) = update.needs_response {
            self.needs_response = needs_response;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(priority) = update.priority {
            self.priority = priority.min(100);
        }
        self.updated_at = now;
    }

    /// Mark deleted. Idempotent: an already deleted message keeps its
    /// original `deleted_at`.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        if !self.deleted {
            self.deleted = true;
            self.deleted_at = Some(now);
        }
        self.updated_at = now;
    }
}

// ── Mutations and queries ───────────────────────────────────────────

/// Partial update of a message's mutable lifecycle fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageUpdate {
    pub handled: Option<bool>,
    pub needs_response: Option<bool>,
    pub category: Option<Category>,
    pub priority: Option<u8>,
}

impl MessageUpdate {
    pub fn handled(handled: bool) -> Self {
        Self {
            handled: Some(handled),
            ..Default::default()
        }
    }

    pub fn needs_response(needs_response: bool) -> Self {
        Self {
            needs_response: Some(needs_response),
            ..Default::default()
        }
    }

    /// Manual recategorization; `ai_category` is left untouched.
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handled.is_none()
            && self.needs_response.is_none()
            && self.category.is_none()
            && self.priority.is_none()
    }
}

/// Query over stored messages. Ordered by `timestamp` descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageFilter {
    pub category: Option<Category>,
    pub handled: Option<bool>,
    pub needs_response: Option<bool>,
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

/// Aggregate counts over a set of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub total: usize,
    pub urgent: usize,
    pub question: usize,
    pub fyi: usize,
    pub routine: usize,
    pub handled: usize,
    pub needs_response: usize,
}

impl MessageStats {
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut stats = Self {
            total: messages.len(),
            ..Default::default()
        };
        for message in messages {
            match message.category {
                Category::Urgent => stats.urgent += 1,
                Category::Question => stats.question += 1,
                Category::Fyi => stats.fyi += 1,
                Category::Routine => stats.routine += 1,
            }
            if message.handled {
                stats.handled += 1;
            }
            if message.needs_response {
                stats.needs_response += 1;
            }
        }
        stats
    }
}
