//! Message triage pipeline.
//!
//! Every inbound Slack event flows through:
//! 1. `EventIngestor::ingest()`: filtering, identity and mention resolution
//! 2. `AiClassifier::classify()`: generation-service triage
//! 3. `RuleClassifier::classify()`: keyword fallback, never fails
//! 4. `MessageStore::create()`: upsert by message id

pub mod classifier;
pub mod ingest;
pub mod rules;
pub mod types;

pub use classifier::{AiClassifier, FallbackReason, RejectReason};
pub use ingest::{DropReason, EventIngestor, IngestConfig, IngestOutcome};
pub use rules::RuleClassifier;
pub use types::{Category, ClassificationResult, ClassificationSource, Message};
