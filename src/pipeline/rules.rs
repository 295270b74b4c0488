//! Deterministic keyword classifier.
//!
//! Always available, so it is both the fast path when no text generation
//! service is configured and the fallback for every AI failure:
//! - urgent keywords or `!!` → urgent
//! - question keywords, or a mention with `?` → question
//! - fyi keywords or attachments → fyi
//! - everything else → routine
//!
//! Mentions and thread membership then bump the priority.

use tracing::debug;

use crate::pipeline::types::{
    Category, ClassificationResult, ClassificationSource, MessageMetadata, clamp_priority,
};

/// Which keyword set a keyword belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordSet {
    Urgent,
    Question,
    Fyi,
}

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "emergency",
    "critical",
    "immediately",
    "down",
    "outage",
    "broken",
    "failed",
    "error",
    "crash",
    "help needed",
    "red alert",
    "production",
    "live site",
    "🚨",
    "🔥",
    "⚠️",
];

const QUESTION_KEYWORDS: &[&str] = &[
    "?",
    "how",
    "what",
    "when",
    "where",
    "why",
    "who",
    "can you",
    "could you",
    "would you",
    "should i",
    "do you know",
    "any idea",
    "wondering",
    "question",
    "help",
    "confused",
    "clarify",
    "explain",
];

const FYI_KEYWORDS: &[&str] = &[
    "fyi",
    "for your information",
    "heads up",
    "just so you know",
    "update:",
    "status:",
    "announcement:",
    "notice:",
    "deployed",
    "released",
    "completed",
    "finished",
    "✅",
    "ℹ️",
    "📢",
];

/// Signals extracted from a message before the decision is made.
#[derive(Debug, Clone, Copy, Default)]
struct Signals {
    urgent_keyword: bool,
    question_keyword: bool,
    fyi_keyword: bool,
    multi_exclamation: bool,
    question_mark: bool,
    mentioned: bool,
    in_thread: bool,
    has_attachments: bool,
}

/// Keyword classifier. Pure: same input, same output.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    urgent: Vec<String>,
    question: Vec<String>,
    fyi: Vec<String>,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl RuleClassifier {
    /// Create a classifier with the built-in keyword sets.
    pub fn default_rules() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            urgent: owned(URGENT_KEYWORDS),
            question: owned(QUESTION_KEYWORDS),
            fyi: owned(FYI_KEYWORDS),
        }
    }

    /// Create a classifier with no keywords (for testing).
    pub fn empty() -> Self {
        Self {
            urgent: Vec::new(),
            question: Vec::new(),
            fyi: Vec::new(),
        }
    }

    /// Add a custom keyword. Matching is case-insensitive.
    pub fn add_keyword(&mut self, set: KeywordSet, keyword: &str) {
        let keyword = keyword.to_lowercase();
        match set {
            KeywordSet::Urgent => self.urgent.push(keyword),
            KeywordSet::Question => self.question.push(keyword),
            KeywordSet::Fyi => self.fyi.push(keyword),
        }
    }

    fn signals(&self, text: &str, metadata: &MessageMetadata) -> Signals {
        let lower = text.to_lowercase();
        let any = |words: &[String]| words.iter().any(|w| lower.contains(w.as_str()));
        Signals {
            urgent_keyword: any(&self.urgent),
            question_keyword: any(&self.question),
            fyi_keyword: any(&self.fyi),
            multi_exclamation: text.matches('!').count() >= 2,
            question_mark: text.contains('?'),
            mentioned: metadata.mentions_user,
            in_thread: metadata.in_thread(),
            has_attachments: metadata.has_attachments,
        }
    }

    /// Classify a message.
    pub fn classify(&self, text: &str, metadata: &MessageMetadata) -> ClassificationResult {
        if text.is_empty() {
            return ClassificationResult {
                category: Category::Routine,
                priority: 30,
                needs_response: false,
                confidence: 0.5,
                source: ClassificationSource::RuleBased,
                reasoning: None,
            };
        }

        let s = self.signals(text, metadata);

        let (category, mut priority, mut needs_response, confidence): (Category, i64, bool, f32) =
            if s.urgent_keyword || s.multi_exclamation {
                let confidence = if s.urgent_keyword { 0.85 } else { 0.75 };
                (Category::Urgent, 95, true, confidence)
            } else if s.question_keyword || (s.mentioned && s.question_mark) {
                let confidence = if s.question_keyword { 0.8 } else { 0.7 };
                (Category::Question, 70, true, confidence)
            } else if s.fyi_keyword || s.has_attachments {
                let confidence = if s.fyi_keyword { 0.75 } else { 0.6 };
                (Category::Fyi, 40, false, confidence)
            } else {
                (Category::Routine, 30, s.mentioned, 0.6)
            };

        if s.mentioned && category != Category::Urgent {
            priority += 15;
            needs_response = true;
        }
        if s.in_thread {
            priority += 5;
        }

        let result = ClassificationResult {
            category,
            priority: clamp_priority(priority),
            needs_response,
            confidence,
            source: ClassificationSource::RuleBased,
            reasoning: None,
        };

        debug!(
            category = %result.category,
            priority = result.priority,
            needs_response = result.needs_response,
            "Rule-based classification"
        );
        result
    }

    /// Classify and explain which signals fired.
    pub fn classify_with_reasoning(
        &self,
        text: &str,
        metadata: &MessageMetadata,
    ) -> ClassificationResult {
        let mut result = self.classify(text, metadata);
        let s = self.signals(text, metadata);

        let mut reasons = Vec::new();
        if s.urgent_keyword {
            reasons.push("Contains urgent keywords");
        }
        if s.multi_exclamation {
            reasons.push("Multiple exclamation marks");
        }
        if s.question_mark {
            reasons.push("Contains question mark");
        }
        if s.fyi_keyword {
            reasons.push("Contains FYI keywords");
        }
        if s.mentioned {
            reasons.push("User is mentioned");
        }
        if s.has_attachments {
            reasons.push("Has attachments");
        }
        if s.in_thread {
            reasons.push("Part of a thread");
        }

        result.reasoning = Some(if reasons.is_empty() {
            "No strong signals".to_string()
        } else {
            reasons.join(", ")
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MessageMetadata {
        MessageMetadata::default()
    }

    fn mentioned() -> MessageMetadata {
        MessageMetadata {
            mentions_user: true,
            ..Default::default()
        }
    }

    fn threaded() -> MessageMetadata {
        MessageMetadata {
            thread_ts: Some("1700000000.000100".into()),
            ..Default::default()
        }
    }

    #[test]
    fn urgent_keyword_with_exclamations() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("URGENT!! production is down", &meta());
        assert_eq!(result.category, Category::Urgent);
        assert_eq!(result.priority, 95);
        assert!(result.needs_response);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.source, ClassificationSource::RuleBased);
    }

    #[test]
    fn urgent_wins_over_question_and_fyi() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("fyi: the site is broken, how do we fix it?", &meta());
        assert_eq!(result.category, Category::Urgent);
        assert_eq!(result.priority, 95);
    }

    #[test]
    fn exclamations_alone_are_urgent_with_lower_confidence() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("look at this!!", &meta());
        assert_eq!(result.category, Category::Urgent);
        assert_eq!(result.confidence, 0.75);

        let single = engine.classify("nice work!", &meta());
        assert_ne!(single.category, Category::Urgent);
    }

    #[test]
    fn mention_does_not_bump_urgent() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("urgent: call me", &mentioned());
        assert_eq!(result.priority, 95);
    }

    #[test]
    fn question_keyword() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("how do I reset my password?", &meta());
        assert_eq!(result.category, Category::Question);
        assert_eq!(result.priority, 70);
        assert!(result.needs_response);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn mention_with_question_mark_without_keywords() {
        let mut engine = RuleClassifier::empty();
        engine.add_keyword(KeywordSet::Fyi, "fyi");
        let result = engine.classify("lunch tomorrow?", &mentioned());
        assert_eq!(result.category, Category::Question);
        assert_eq!(result.confidence, 0.7);
        // 70 + 15 for the mention.
        assert_eq!(result.priority, 85);
    }

    #[test]
    fn fyi_keyword() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("fyi deployed v2 today", &meta());
        assert_eq!(result.category, Category::Fyi);
        assert_eq!(result.priority, 40);
        assert!(!result.needs_response);
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn attachment_alone_is_fyi() {
        let engine = RuleClassifier::default_rules();
        let metadata = MessageMetadata {
            has_attachments: true,
            ..Default::default()
        };
        let result = engine.classify("[Shared 1 file: notes.txt]", &metadata);
        assert_eq!(result.category, Category::Fyi);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn routine_default() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("thanks, sounds good", &meta());
        assert_eq!(result.category, Category::Routine);
        assert_eq!(result.priority, 30);
        assert!(!result.needs_response);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn mention_bumps_priority_and_forces_response() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("fyi deployed v2 today", &mentioned());
        assert_eq!(result.category, Category::Fyi);
        assert_eq!(result.priority, 55);
        assert!(result.needs_response);

        let routine = engine.classify("thanks, sounds good", &mentioned());
        assert_eq!(routine.priority, 45);
        assert!(routine.needs_response);
    }

    #[test]
    fn thread_adds_five_after_mention() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("thanks, sounds good", &threaded());
        assert_eq!(result.priority, 35);

        let both = MessageMetadata {
            mentions_user: true,
            thread_ts: Some("1.0".into()),
            ..Default::default()
        };
        let result = engine.classify("how is it going", &both);
        assert_eq!(result.priority, 90);
    }

    #[test]
    fn urgent_in_thread_is_clamped() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("emergency", &threaded());
        assert_eq!(result.priority, 100);
    }

    #[test]
    fn empty_text_is_routine() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("", &meta());
        assert_eq!(result.category, Category::Routine);
        assert_eq!(result.priority, 30);
        assert!(!result.needs_response);
        assert_eq!(result.confidence, 0.5);

    }

    #[test]
    fn whitespace_text_is_not_treated_as_empty() {
        let engine = RuleClassifier::default_rules();
        let result = engine.classify("   ", &mentioned());
        assert_eq!(result.category, Category::Routine);
        assert_eq!(result.priority, 45);
        assert!(result.needs_response);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let mut engine = RuleClassifier::empty();
        engine.add_keyword(KeywordSet::Urgent, "PAGER");
        let result = engine.classify("Pager went off", &meta());
        assert_eq!(result.category, Category::Urgent);
    }

    #[test]
    fn reasoning_lists_fired_signals() {
        let engine = RuleClassifier::default_rules();
        let metadata = MessageMetadata {
            mentions_user: true,
            has_attachments: true,
            ..Default::default()
        };
        let result = engine.classify_with_reasoning("urgent: can you check?", &metadata);
        let reasoning = result.reasoning.unwrap();
        assert!(reasoning.contains("Contains urgent keywords"));
        assert!(reasoning.contains("Contains question mark"));
        assert!(reasoning.contains("User is mentioned"));
        assert!(reasoning.contains("Has attachments"));

        let quiet = engine.classify_with_reasoning("thanks", &meta());
        assert_eq!(quiet.reasoning.as_deref(), Some("No strong signals"));
    }

    #[test]
    fn reasoning_does_not_change_decision() {
        let engine = RuleClassifier::default_rules();
        let plain = engine.classify("how do I reset my password?", &mentioned());
        let reasoned = engine.classify_with_reasoning("how do I reset my password?", &mentioned());
        assert_eq!(plain.category, reasoned.category);
        assert_eq!(plain.priority, reasoned.priority);
        assert_eq!(plain.confidence, reasoned.confidence);
    }
}
