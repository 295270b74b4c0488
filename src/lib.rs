//! Triage Assist: Slack message triage core.

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod knowledge;
pub mod llm;
pub mod pipeline;
pub mod slack;
pub mod store;
