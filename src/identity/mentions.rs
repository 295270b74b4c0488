//! Rewrites `<@U…>` mention tokens into readable `@name` text.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::cache::{IdentityCache, IdentityRecord};

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@([A-Z0-9]+)>").unwrap());

/// Text with mentions replaced, plus the identities that were substituted.
#[derive(Debug, Clone, Default)]
pub struct ResolvedMentions {
    pub text: String,
    pub users: HashMap<String, IdentityRecord>,
}

/// Unique mentioned user ids, in order of first appearance.
pub fn extract_user_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for cap in MENTION_RE.captures_iter(text) {
        let id = &cap[1];
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

pub struct MentionResolver {
    cache: Arc<IdentityCache>,
}

impl MentionResolver {
    pub fn new(cache: Arc<IdentityCache>) -> Self {
        Self { cache }
    }

    /// Resolve every distinct mention concurrently and substitute
    /// `@display_name` for each token. Lookup failures come back from the
    /// cache as "Unknown User" and are substituted as such.
    pub async fn resolve(&self, text: &str) -> ResolvedMentions {
        if text.is_empty() {
            return ResolvedMentions::default();
        }

        let ids = extract_user_ids(text);
        if ids.is_empty() {
            return ResolvedMentions {
                text: text.to_string(),
                users: HashMap::new(),
            };
        }

        let records =
            futures::future::join_all(ids.iter().map(|id| self.cache.resolve(id))).await;

        let mut resolved = text.to_string();
        let mut users = HashMap::with_capacity(ids.len());
        for (id, record) in ids.into_iter().zip(records) {
            resolved = resolved.replace(&format!("<@{id}>"), &format!("@{}", record.display_name));
            users.insert(id, record);
        }

        ResolvedMentions {
            text: resolved,
            users,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::identity::cache::tests::StubSource;

    fn resolver(source: Arc<StubSource>) -> MentionResolver {
        MentionResolver::new(IdentityCache::new(source, Duration::from_secs(1)))
    }

    #[test]
    fn extract_ids_dedupes_in_order() {
        let ids = extract_user_ids("<@U2> ping <@U1> and <@U2> again, not <@u3> or <#C1>");
        assert_eq!(ids, vec!["U2".to_string(), "U1".to_string()]);
    }

    #[tokio::test]
    async fn replaces_mentions_with_display_names() {
        let source = Arc::new(StubSource::with_users(&[("U123", "Alice")]));
        let resolver = resolver(Arc::clone(&source));

        let out = resolver.resolve("<@U123> can you review?").await;
        assert_eq!(out.text, "@Alice can you review?");
        assert_eq!(out.users["U123"].display_name, "Alice");
    }

    #[tokio::test]
    async fn repeated_mention_looked_up_once() {
        let source = Arc::new(StubSource::with_users(&[("U1", "Alice"), ("U2", "Bob")]));
        let resolver = resolver(Arc::clone(&source));

        let out = resolver.resolve("<@U1> <@U2> <@U1>").await;
        assert_eq!(out.text, "@Alice @Bob @Alice");
        assert_eq!(out.users.len(), 2);
        assert_eq!(source.lookups(), 2);
    }

    #[tokio::test]
    async fn failed_lookup_substitutes_unknown_user() {
        let source = Arc::new(StubSource::with_users(&[]));
        let resolver = resolver(source);

        let out = resolver.resolve("hey <@UX>").await;
        assert_eq!(out.text, "hey @Unknown User");
        assert!(out.users["UX"].is_placeholder());
    }

    #[tokio::test]
    async fn empty_and_plain_text_pass_through() {
        let source = Arc::new(StubSource::with_users(&[]));
        let resolver = resolver(Arc::clone(&source));

        let empty = resolver.resolve("").await;
        assert_eq!(empty.text, "");
        assert!(empty.users.is_empty());

        let plain = resolver.resolve("no mentions here").await;
        assert_eq!(plain.text, "no mentions here");
        assert_eq!(source.lookups(), 0);
    }
}
