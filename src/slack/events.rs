//! Events API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outer Events API envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    /// Sent once when the request URL is configured.
    UrlVerification { challenge: String },
    /// A subscribed event.
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// A `message` or `app_mention` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    /// Author reference.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Message timestamp; doubles as the message id.
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
    /// Set on `message_deleted`.
    #[serde(default)]
    pub deleted_ts: Option<String>,
    #[serde(default)]
    pub previous_message: Option<PreviousMessage>,
}

/// File attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// The message a `message_deleted` / `message_changed` event refers to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviousMessage {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageEvent {
    /// Decode the inner event of an `event_callback`. Returns `None` for
    /// event types the pipeline does not consume.
    pub fn from_callback(event: &serde_json::Value) -> Option<Self> {
        match event.get("type").and_then(|t| t.as_str()) {
            Some("message") | Some("app_mention") => serde_json::from_value(event.clone()).ok(),
            _ => None,
        }
    }

    /// Id of the message removed by a `message_deleted` event.
    pub fn deleted_message_id(&self) -> Option<&str> {
        self.deleted_ts
            .as_deref()
            .or_else(|| self.previous_message.as_ref().and_then(|p| p.ts.as_deref()))
            .filter(|ts| !ts.is_empty())
    }

    /// Placeholder text for file shares posted without a message body.
    pub fn file_placeholder(&self) -> Option<String> {
        if self.files.is_empty() {
            return None;
        }
        let names: Vec<&str> = self
            .files
            .iter()
            .filter_map(|f| f.name.as_deref().or(f.title.as_deref()))
            .collect();
        let count = self.files.len();
        let noun = if count == 1 { "file" } else { "files" };
        Some(if names.is_empty() {
            format!("[Shared {count} {noun}]")
        } else {
            format!("[Shared {count} {noun}: {}]", names.join(", "))
        })
    }
}

/// Convert a Slack `ts` ("1700000000.000100") to a UTC timestamp.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = match ts.split_once('.') {
        Some((s, f)) => (s, f),
        None => (ts, ""),
    };
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(6).collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        format!("{digits:0<6}").parse().ok()?
    };
    DateTime::from_timestamp(secs, micros * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_url_verification() {
        let envelope: EventEnvelope = serde_json::from_value(serde_json::json!({
            "type": "url_verification",
            "token": "t",
            "challenge": "abc123"
        }))
        .unwrap();
        match envelope {
            EventEnvelope::UrlVerification { challenge } => assert_eq!(challenge, "abc123"),
            other => panic!("Expected UrlVerification, got {:?}", other),
        }
    }

    #[test]
    fn envelope_event_callback_decodes_message() {
        let envelope: EventEnvelope = serde_json::from_value(serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": "message",
                "user": "U1",
                "channel": "C1",
                "text": "hello",
                "ts": "1700000000.000100"
            }
        }))
        .unwrap();
        let EventEnvelope::EventCallback { event, event_id } = envelope else {
            panic!("Expected EventCallback");
        };
        assert_eq!(event_id.as_deref(), Some("Ev1"));
        let msg = MessageEvent::from_callback(&event).unwrap();
        assert_eq!(msg.user.as_deref(), Some("U1"));
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert!(msg.subtype.is_none());
    }

    #[test]
    fn envelope_unknown_type() {
        let envelope: EventEnvelope =
            serde_json::from_value(serde_json::json!({"type": "app_rate_limited"})).unwrap();
        assert!(matches!(envelope, EventEnvelope::Unknown));
    }

    #[test]
    fn non_message_events_are_skipped() {
        let event = serde_json::json!({"type": "reaction_added", "user": "U1"});
        assert!(MessageEvent::from_callback(&event).is_none());
    }

    #[test]
    fn deleted_message_id_prefers_deleted_ts() {
        let event = MessageEvent {
            subtype: Some("message_deleted".into()),
            deleted_ts: Some("1.1".into()),
            previous_message: Some(PreviousMessage {
                ts: Some("2.2".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(event.deleted_message_id(), Some("1.1"));

        let fallback = MessageEvent {
            previous_message: Some(PreviousMessage {
                ts: Some("2.2".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(fallback.deleted_message_id(), Some("2.2"));
        assert_eq!(MessageEvent::default().deleted_message_id(), None);
    }

    #[test]
    fn file_placeholder_lists_names() {
        let event = MessageEvent {
            files: vec![
                SlackFile {
                    name: Some("report.pdf".into()),
                    ..Default::default()
                },
                SlackFile {
                    title: Some("screenshot".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            event.file_placeholder().as_deref(),
            Some("[Shared 2 files: report.pdf, screenshot]")
        );
        assert!(MessageEvent::default().file_placeholder().is_none());
    }

    #[test]
    fn parse_ts_with_fraction() {
        let dt = parse_ts("1700000000.000100").unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_micros(), 100);
    }

    #[test]
    fn parse_ts_rejects_garbage() {
        assert!(parse_ts("abc").is_none());
        assert!(parse_ts("12.x4").is_none());
        assert_eq!(parse_ts("5").unwrap().timestamp(), 5);
    }
}
