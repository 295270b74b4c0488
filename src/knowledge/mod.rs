//! Knowledge base entries and keyword retrieval.

pub mod draft;

pub use draft::{DraftConfig, DraftGenerator, DraftResponse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Max keywords derived from a message.
pub const MAX_KEYWORDS: usize = 5;

/// A question/answer pair used to ground drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
    pub use_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// True if any keyword, lowercased, is a substring of one of this
    /// entry's keywords, its question, or its answer.
    pub fn matches(&self, keywords: &[String]) -> bool {
        let question = self.question.to_lowercase();
        let answer = self.answer.to_lowercase();
        let own: Vec<String> = self.keywords.iter().map(|k| k.to_lowercase()).collect();

        keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            if keyword.is_empty() {
                return false;
            }
            own.iter().any(|k| k.contains(&keyword))
                || question.contains(&keyword)
                || answer.contains(&keyword)
        })
    }
}

/// Input for creating an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKnowledgeEntry {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl NewKnowledgeEntry {
    /// Question and answer are required.
    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() || self.answer.trim().is_empty() {
            return Err("Question and answer are required".to_string());
        }
        Ok(())
    }
}

/// Partial update of an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeUpdate {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub keywords: Option<Vec<String>>,
}

/// Search keywords for a message: whitespace-split tokens longer than three
/// characters, at most the first five.
pub fn derive_keywords(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|word| word.chars().count() > 3)
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}
