//! AI-backed classifier with rule-based fallback.
//!
//! Flow:
//! 1. No provider configured → rule-based result
//! 2. One completion call, bounded by the generation timeout
//! 3. Strict decode of the first JSON object in the reply
//!
//! Any failure in 2 or 3 returns exactly what the rule-based classifier
//! would have returned for the same message.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::rules::RuleClassifier;
use crate::pipeline::types::{
    Category, ClassificationResult, ClassificationSource, Message, clamp_priority,
};

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 500;

const DEFAULT_PRIORITY: u8 = 50;
const DEFAULT_CONFIDENCE: f32 = 0.7;
const DEFAULT_REASONING: &str = "No reasoning provided";

/// Why an AI reply was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NoJsonObject,
    MalformedJson(String),
    NotAnObject,
    MissingCategory,
    UnknownCategory(String),
}

impl RejectReason {
    /// Stable label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoJsonObject => "no_json_object",
            Self::MalformedJson(_) => "malformed_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingCategory => "missing_category",
            Self::UnknownCategory(_) => "unknown_category",
        }
    }
}

/// Why the AI path was abandoned for the rule-based result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NotConfigured,
    Timeout,
    RequestFailed(String),
    Rejected(RejectReason),
}

impl FallbackReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Timeout => "timeout",
            Self::RequestFailed(_) => "request_failed",
            Self::Rejected(reason) => reason.label(),
        }
    }
}

/// Two-tier classifier.
pub struct AiClassifier {
    llm: Option<Arc<dyn LlmProvider>>,
    rules: RuleClassifier,
    timeout: Duration,
}

impl AiClassifier {
    pub fn new(
        llm: Option<Arc<dyn LlmProvider>>,
        rules: RuleClassifier,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            rules,
            timeout,
        }
    }

    pub fn is_ai_enabled(&self) -> bool {
        self.llm.is_some()
    }

    pub fn rules(&self) -> &RuleClassifier {
        &self.rules
    }

    /// Classify a message. Never fails.
    pub async fn classify(&self, message: &Message) -> ClassificationResult {
        match self.try_classify(message).await {
            Ok(result) => {
                debug!(
                    id = %message.id,
                    category = %result.category,
                    priority = result.priority,
                    confidence = result.confidence,
                    "AI classification"
                );
                result
            }
            Err(reason) => {
                if reason != FallbackReason::NotConfigured {
                    warn!(
                        id = %message.id,
                        reason = reason.label(),
                        detail = ?reason,
                        "AI classification failed, using rule-based result"
                    );
                }
                self.rules.classify(&message.text, &message.metadata)
            }
        }
    }

    async fn try_classify(&self, message: &Message) -> Result<ClassificationResult, FallbackReason> {
        let llm = self.llm.as_ref().ok_or(FallbackReason::NotConfigured)?;

        let request = CompletionRequest::new(vec![ChatMessage::user(build_classify_prompt(
            message,
        ))])
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = tokio::time::timeout(self.timeout, llm.complete(request))
            .await
            .map_err(|_| FallbackReason::Timeout)?
            .map_err(|e| FallbackReason::RequestFailed(e.to_string()))?;

        parse_classification(&response.content).map_err(FallbackReason::Rejected)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

/// Build the classification prompt for a message.
fn build_classify_prompt(message: &Message) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(
        "You are a message categorization assistant for a Slack message management system. \
         Analyze the following message and categorize it.\n\n\
         Categories:\n\
         - urgent: Requires immediate attention (production issues, outages, critical bugs, emergencies)\n\
         - question: Someone is asking a question or requesting help\n\
         - fyi: Informational only, no response needed (announcements, status updates, deployments)\n\
         - routine: General conversation, low priority\n\n",
    );

    prompt.push_str("Message Details:\n");
    prompt.push_str(&format!("Text: \"{}\"\n", message.text));
    prompt.push_str(&format!(
        "From: {} (@{})\n",
        message.user.real_name, message.user.name
    ));
    prompt.push_str(&format!("Channel: #{}\n", message.channel.name));
    prompt.push_str(&format!(
        "Has attachments: {}\n",
        yes_no(message.metadata.has_attachments)
    ));
    prompt.push_str(&format!(
        "User mentioned: {}\n",
        yes_no(message.metadata.mentions_user)
    ));
    prompt.push_str(&format!("In thread: {}\n\n", yes_no(message.metadata.in_thread())));

    prompt.push_str(
        "Respond in this EXACT JSON format:\n\
         {\n  \"category\": \"urgent|question|fyi|routine\",\n  \"priority\": 0-100,\n  \
         \"needsResponse\": true|false,\n  \"confidence\": 0.0-1.0,\n  \
         \"reasoning\": \"brief explanation\"\n}",
    );

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse an AI reply into a classification.
fn parse_classification(raw: &str) -> Result<ClassificationResult, RejectReason> {
    let json_str = extract_first_object(raw).ok_or(RejectReason::NoJsonObject)?;
    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| RejectReason::MalformedJson(e.to_string()))?;
    let obj = value.as_object().ok_or(RejectReason::NotAnObject)?;

    let category_raw = obj
        .get("category")
        .and_then(|v| v.as_str())
        .ok_or(RejectReason::MissingCategory)?;
    let category = Category::parse_exact(category_raw)
        .ok_or_else(|| RejectReason::UnknownCategory(category_raw.to_string()))?;

    let priority = obj
        .get("priority")
        .and_then(|v| v.as_f64())
        .map(|p| clamp_priority(p.round() as i64))
        .unwrap_or(DEFAULT_PRIORITY);

    let confidence = obj
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| (c as f32).clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let needs_response = obj
        .get("needsResponse")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let reasoning = obj
        .get("reasoning")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_REASONING)
        .to_string();

    Ok(ClassificationResult {
        category,
        priority,
        needs_response,
        confidence,
        source: ClassificationSource::Ai,
        reasoning: Some(reasoning),
    })
}

/// Find the first balanced `{...}` in `text`, ignoring braces inside JSON
/// strings. Handles markdown fences and surrounding prose.
fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
