//! Knowledge-assisted draft replies.
//!
//! A draft is one completion call over a prompt built from the message and
//! up to three knowledge entries. Drafts are suggestions only; nothing here
//! sends anything.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{KnowledgeEntry, derive_keywords};
use crate::error::{DraftError, LlmError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Message;
use crate::store::KnowledgeStore;

/// Draft generation settings.
#[derive(Debug, Clone)]
pub struct DraftConfig {
    pub max_tokens: u32,
    /// Max knowledge entries included in the prompt.
    pub max_entries: usize,
    pub timeout: Duration,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            max_entries: 3,
            timeout: Duration::from_secs(20),
        }
    }
}

/// A generated draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftResponse {
    pub draft: String,
    pub confidence: f32,
    pub used_knowledge_base: bool,
    pub kb_entries_used: usize,
}

pub struct DraftGenerator {
    llm: Option<Arc<dyn LlmProvider>>,
    knowledge: Arc<dyn KnowledgeStore>,
    config: DraftConfig,
}

impl DraftGenerator {
    pub fn new(
        llm: Option<Arc<dyn LlmProvider>>,
        knowledge: Arc<dyn KnowledgeStore>,
        config: DraftConfig,
    ) -> Self {
        Self {
            llm,
            knowledge,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.llm.is_some()
    }

    /// Generate a draft reply. Uses `prefetched` entries when non-empty,
    /// otherwise searches the knowledge base with keywords from the text.
    pub async fn generate_draft(
        &self,
        message: &Message,
        prefetched: &[KnowledgeEntry],
    ) -> Result<DraftResponse, DraftError> {
        let llm = self.llm.as_ref().ok_or(DraftError::NotConfigured)?;

        let mut entries = if prefetched.is_empty() {
            self.retrieve(message).await
        } else {
            prefetched.to_vec()
        };
        entries.truncate(self.config.max_entries);

        let request =
            CompletionRequest::new(vec![ChatMessage::user(build_draft_prompt(message, &entries))])
                .with_max_tokens(self.config.max_tokens);

        let response = tokio::time::timeout(self.config.timeout, llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: llm.model_name().to_string(),
                timeout: self.config.timeout,
            })??;

        let used = !entries.is_empty();
        for entry in &entries {
            self.record_use(&entry.id);
        }

        info!(
            id = %message.id,
            kb_entries = entries.len(),
            output_tokens = response.output_tokens,
            "Draft generated"
        );

        Ok(DraftResponse {
            draft: response.content,
            confidence: if used { 0.85 } else { 0.7 },
            used_knowledge_base: used,
            kb_entries_used: entries.len(),
        })
    }

    /// Keyword search. A failing knowledge base degrades to no entries.
    async fn retrieve(&self, message: &Message) -> Vec<KnowledgeEntry> {
        let keywords = derive_keywords(&message.text);
        if keywords.is_empty() {
            return Vec::new();
        }
        match self.knowledge.search(&keywords).await {
            Ok(entries) => {
                debug!(id = %message.id, ?keywords, found = entries.len(), "Knowledge search");
                entries
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "Knowledge search failed, drafting without it");
                Vec::new()
            }
        }
    }

    /// Fire-and-forget use-count bump.
    fn record_use(&self, entry_id: &str) {
        let knowledge = Arc::clone(&self.knowledge);
        let entry_id = entry_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = knowledge.increment_use_count(&entry_id).await {
                warn!(entry = %entry_id, error = %e, "Failed to increment knowledge use count");
            }
        });
    }
}

fn build_draft_prompt(message: &Message, entries: &[KnowledgeEntry]) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("You are drafting a response to this Slack message:\n\n");
    prompt.push_str(&format!(
        "From: {} (@{})\n",
        message.user.real_name, message.user.name
    ));
    prompt.push_str(&format!("Channel: #{}\n", message.channel.name));
    prompt.push_str(&format!("Message: \"{}\"\n", message.text));

    if !entries.is_empty() {
        prompt.push_str("\nRelevant Knowledge Base Entries:\n");
        for (i, entry) in entries.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. Q: {}\n   A: {}\n\n",
                i + 1,
                entry.question,
                entry.answer
            ));
        }
    }

    prompt.push_str(
        "\nDraft a helpful, professional response to this message. \
         If knowledge base entries are relevant, use that information. \
         Keep it concise and friendly. Match the tone of the original message.\n\n\
         Draft Response:",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::DatabaseError;
    use crate::knowledge::tests::password_entry;
    use crate::knowledge::{KnowledgeUpdate, NewKnowledgeEntry};
    use crate::llm::provider::{CompletionResponse, FinishReason};
    use crate::pipeline::types::Category;
    use crate::pipeline::types::tests::make_message;
    use crate::store::LibSqlBackend;

    /// Mock LLM that records the prompt it was given.
    struct MockDraftLlm {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockDraftLlm {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmProvider for MockDraftLlm {
        fn model_name(&self) -> &str {
            "mock-draft"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = request
                .messages
                .iter()
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(prompt);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                    input_tokens: 200,
                    output_tokens: 40,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "boom".into(),
                }),
            }
        }
    }

    /// Knowledge store whose every call fails.
    struct BrokenKnowledge;

    #[async_trait]
    impl KnowledgeStore for BrokenKnowledge {
        async fn create_entry(
            &self,
            _entry: NewKnowledgeEntry,
        ) -> Result<KnowledgeEntry, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn list_entries(&self) -> Result<Vec<KnowledgeEntry>, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn get_entry(&self, _id: &str) -> Result<Option<KnowledgeEntry>, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn update_entry(
            &self,
            _id: &str,
            _update: KnowledgeUpdate,
        ) -> Result<Option<KnowledgeEntry>, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn delete_entry(&self, _id: &str) -> Result<bool, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn search(&self, _keywords: &[String]) -> Result<Vec<KnowledgeEntry>, DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
        async fn increment_use_count(&self, _id: &str) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("down".into()))
        }
    }

    async fn seeded_backend() -> (Arc<LibSqlBackend>, KnowledgeEntry) {
        let backend = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let entry = backend
            .create_entry(NewKnowledgeEntry {
                question: "how to reset password".into(),
                answer: "use the portal".into(),
                keywords: vec!["password".into(), "reset".into()],
            })
            .await
            .unwrap();
        (backend, entry)
    }

    #[tokio::test]
    async fn draft_text_is_returned_verbatim() {
        let (backend, _) = seeded_backend().await;
        let llm = MockDraftLlm::replying("\n  Hi there\n");
        let generator = DraftGenerator::new(Some(llm), backend, DraftConfig::default());

        let msg = make_message("1.0", "hello", Category::Routine);
        let draft = generator.generate_draft(&msg, &[]).await.unwrap();
        assert_eq!(draft.draft, "\n  Hi there\n");
    }

    #[tokio::test]
    async fn draft_uses_knowledge_base() {
        let (backend, entry) = seeded_backend().await;
        let llm = MockDraftLlm::replying("Try the self-service portal.");
        let generator = DraftGenerator::new(Some(llm.clone()), backend.clone(), DraftConfig::default());

        let msg = make_message("1.0", "I forgot my password again", Category::Question);
        let draft = generator.generate_draft(&msg, &[]).await.unwrap();

        assert_eq!(draft.draft, "Try the self-service portal.");
        assert!(draft.used_knowledge_base);
        assert_eq!(draft.confidence, 0.85);
        assert_eq!(draft.kb_entries_used, 1);

        let prompt = llm.last_prompt();
        assert!(prompt.contains("From: Alice (@alice)"));
        assert!(prompt.contains("Channel: #general"));
        assert!(prompt.contains("1. Q: how to reset password\n   A: use the portal"));

        // The use-count bump is spawned; give it a moment.
        for _ in 0..50 {
            let stored = backend.get_entry(&entry.id).await.unwrap().unwrap();
            if stored.use_count == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("use count was not incremented");
    }

    #[tokio::test]
    async fn draft_without_matches() {
        let (backend, _) = seeded_backend().await;
        let llm = MockDraftLlm::replying("Sounds good!");
        let generator = DraftGenerator::new(Some(llm.clone()), backend, DraftConfig::default());

        let msg = make_message("1.0", "lunch on friday?", Category::Question);
        let draft = generator.generate_draft(&msg, &[]).await.unwrap();
        assert!(!draft.used_knowledge_base);
        assert_eq!(draft.confidence, 0.7);
        assert_eq!(draft.kb_entries_used, 0);
        assert!(!llm.last_prompt().contains("Relevant Knowledge Base Entries"));
    }

    #[tokio::test]
    async fn prefetched_entries_skip_search_and_truncate() {
        let llm = MockDraftLlm::replying("ok");
        let generator =
            DraftGenerator::new(Some(llm.clone()), Arc::new(BrokenKnowledge), DraftConfig::default());

        let entries: Vec<KnowledgeEntry> = (0..5)
            .map(|i| KnowledgeEntry {
                id: format!("kb-{i}"),
                question: format!("question {i}"),
                ..password_entry()
            })
            .collect();
        let msg = make_message("1.0", "anything", Category::Routine);
        let draft = generator.generate_draft(&msg, &entries).await.unwrap();

        assert_eq!(draft.kb_entries_used, 3);
        let prompt = llm.last_prompt();
        assert!(prompt.contains("3. Q: question 2"));
        assert!(!prompt.contains("question 3"));
    }

    #[tokio::test]
    async fn knowledge_failure_degrades_to_plain_draft() {
        let llm = MockDraftLlm::replying("Happy to help.");
        let generator =
            DraftGenerator::new(Some(llm), Arc::new(BrokenKnowledge), DraftConfig::default());

        let msg = make_message("1.0", "need help with password", Category::Question);
        let draft = generator.generate_draft(&msg, &[]).await.unwrap();
        assert!(!draft.used_knowledge_base);
        assert_eq!(draft.confidence, 0.7);
    }

    #[tokio::test]
    async fn unconfigured_is_an_error() {
        let generator = DraftGenerator::new(None, Arc::new(BrokenKnowledge), DraftConfig::default());
        assert!(!generator.is_enabled());
        let msg = make_message("1.0", "hello", Category::Routine);
        let err = generator.generate_draft(&msg, &[]).await.unwrap_err();
        assert!(matches!(err, DraftError::NotConfigured));
    }

    #[tokio::test]
    async fn generation_failure_propagates() {
        let llm = Arc::new(MockDraftLlm {
            reply: Err(()),
            prompts: Mutex::new(Vec::new()),
        });
        let generator = DraftGenerator::new(Some(llm), Arc::new(BrokenKnowledge), DraftConfig::default());
        let msg = make_message("1.0", "hello", Category::Routine);
        let err = generator.generate_draft(&msg, &[]).await.unwrap_err();
        assert!(matches!(err, DraftError::Generation(_)));
    }
}
