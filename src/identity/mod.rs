//! Identity resolution: a shared user cache and mention rewriting.

pub mod cache;
pub mod mentions;

pub use cache::{CacheStats, IdentityCache, IdentityRecord, UNKNOWN_USER};
pub use mentions::{MentionResolver, ResolvedMentions, extract_user_ids};
