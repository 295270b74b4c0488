//! Slack as an identity source and event producer.
//!
//! The core never talks HTTP to Slack directly; it consumes the
//! `IdentitySource` trait. `SlackClient` is the Web API implementation.

pub mod client;
pub mod events;

pub use client::SlackClient;
pub use events::{EventEnvelope, MessageEvent, SlackFile};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SlackError;

/// A user as returned by `users.info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    /// Short handle.
    pub name: String,
    pub real_name: String,
    pub display_name: String,
}

/// Kind of conversation a message was posted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Channel,
    Group,
    Im,
    Mpim,
    Unknown,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Im => "im",
            Self::Mpim => "mpim",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored kind; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "channel" => Self::Channel,
            "group" => Self::Group,
            "im" => Self::Im,
            "mpim" => Self::Mpim,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation as returned by `conversations.info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

impl ChannelInfo {
    /// Stand-in used when the lookup fails.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "unknown-channel".to_string(),
            kind: ChannelKind::Unknown,
        }
    }
}

/// One message from `conversations.replies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReply {
    pub user: Option<String>,
    pub text: String,
    pub ts: String,
}

/// Source of identity information for opaque user/channel references.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Resolve a user reference (`U…`).
    async fn lookup_user(&self, user_ref: &str) -> Result<UserInfo, SlackError>;

    /// Resolve a channel reference (`C…`, `D…`, `G…`).
    async fn lookup_channel(&self, channel_ref: &str) -> Result<ChannelInfo, SlackError>;

    /// Fetch replies in a thread, parent first.
    async fn fetch_thread_replies(
        &self,
        channel_ref: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadReply>, SlackError>;

    /// The bot's own user id.
    async fn auth_identity(&self) -> Result<String, SlackError>;
}
