//! Canonical entities produced by the fetch pipeline.
//!
//! A [`Post`] is created once by the normalizer and treated as an immutable
//! value object afterwards; the only in-place mutation is the grouping engine
//! attaching `thread_position`/`thread_index`. A [`Thread`] is never persisted
//! as its own entity - it is recomputed from flat posts on every grouping pass.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// The account that wrote a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub handle: String,
    pub avatar_url: String,
}

/// Media attachment classification, derived from URL patterns when the
/// upstream record does not carry an explicit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub key: String,
    pub kind: MediaKind,
    pub url: String,
    pub preview_url: String,
}

/// A single social-media post.
///
/// Deserialization treats every field as optional so records written by
/// older store versions still load; an empty id marks a record unusable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Post {
    /// Opaque numeric-string identifier. Upstream ids are chronologically
    /// monotonic, so they double as a sort key when dates fail to parse.
    pub id: String,
    pub author: Author,
    /// Short-form text as delivered by the upstream API.
    pub text: String,
    /// Expanded text after normalizer cleanup.
    pub full_text: String,
    /// Timestamp string; not guaranteed parseable by any one date format.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub favorite_count: u64,
    #[serde(default)]
    pub quote_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_user_id: Option<String>,
    /// True when the post replies to its own author.
    #[serde(default)]
    pub is_self_thread: bool,
    /// True when the text exceeds the short-form threshold or the normalizer
    /// detected truncation.
    #[serde(default)]
    pub is_long: bool,
    /// Render order within a thread; assigned only during grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_position: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_index: Option<usize>,
    /// Set only when the post has been persisted to the save store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_by: Option<String>,
}

impl Post {
    /// Grouping key resolution order: conversation id, thread id, own id.
    #[must_use]
    pub fn thread_key(&self) -> &str {
        self.conversation_id
            .as_deref()
            .or(self.thread_id.as_deref())
            .unwrap_or(&self.id)
    }

    #[must_use]
    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

/// An ordered, same-author chain of reply-linked posts. Always holds at least
/// two posts - singletons are demoted to standalone [`Post`]s by the grouping
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    /// Thread-position ascending, oldest first.
    pub posts: Vec<Post>,
    pub author: Author,
    /// Timestamp of the earliest member.
    pub created_at: String,
}

impl Thread {
    /// The post whose timestamp represents the thread when ordering a mixed
    /// timeline (its earliest member).
    #[must_use]
    pub fn earliest(&self) -> &Post {
        self.posts
            .iter()
            .min_by(|a, b| chronological(a, b))
            .expect("thread is never empty")
    }
}

/// One element of a grouped timeline: either a standalone post or a
/// reconstructed thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    Post(Post),
    Thread(Thread),
}

impl TimelineItem {
    /// The post carrying the representative timestamp for sort order.
    #[must_use]
    pub fn representative(&self) -> &Post {
        match self {
            Self::Post(post) => post,
            Self::Thread(thread) => thread.earliest(),
        }
    }

    #[must_use]
    pub fn post_count(&self) -> usize {
        match self {
            Self::Post(_) => 1,
            Self::Thread(thread) => thread.posts.len(),
        }
    }
}

/// Parse an upstream timestamp. The proxy emits several shapes depending on
/// which internal endpoint served the record, so try them in turn.
#[must_use]
pub fn parse_created_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        // "Wed Oct 10 20:19:24 +0000 2018" - the classic twitter shape
        .or_else(|_| DateTime::parse_from_str(trimmed, "%a %b %d %H:%M:%S %z %Y"))
        .ok()
}

fn id_as_number(id: &str) -> Option<u128> {
    id.parse().ok()
}

/// Compare two posts oldest-first. Falls back to numeric id comparison when
/// either timestamp fails to parse; unparseable ids sort last.
#[must_use]
pub fn chronological(a: &Post, b: &Post) -> Ordering {
    match (parse_created_at(&a.created_at), parse_created_at(&b.created_at)) {
        (Some(da), Some(db)) => da.cmp(&db),
        _ => match (id_as_number(&a.id), id_as_number(&b.id)) {
            (Some(na), Some(nb)) => na.cmp(&nb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, created_at: &str) -> Post {
        Post {
            id: id.to_string(),
            created_at: created_at.to_string(),
            ..Post::default()
        }
    }

    #[test]
    fn test_parse_created_at_formats() {
        assert!(parse_created_at("2024-01-15T12:00:00Z").is_some());
        assert!(parse_created_at("Mon, 15 Jan 2024 12:00:00 +0000").is_some());
        assert!(parse_created_at("Wed Oct 10 20:19:24 +0000 2018").is_some());
        assert!(parse_created_at("not a date").is_none());
        assert!(parse_created_at("").is_none());
    }

    #[test]
    fn test_chronological_by_date() {
        let a = post("9", "2024-01-01T00:00:00Z");
        let b = post("1", "2024-01-02T00:00:00Z");
        assert_eq!(chronological(&a, &b), Ordering::Less);
        assert_eq!(chronological(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_chronological_id_fallback() {
        // Dates unparseable -> numeric id comparison, not lexicographic
        let a = post("99", "whenever");
        let b = post("100", "later");
        assert_eq!(chronological(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_chronological_fallback_when_one_date_bad() {
        let a = post("5", "2024-01-01T00:00:00Z");
        let b = post("6", "garbage");
        // One bad date forces the id fallback for the pair
        assert_eq!(chronological(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_thread_key_resolution() {
        let mut p = post("10", "");
        assert_eq!(p.thread_key(), "10");
        p.thread_id = Some("t1".to_string());
        assert_eq!(p.thread_key(), "t1");
        p.conversation_id = Some("c1".to_string());
        assert_eq!(p.thread_key(), "c1");
    }

    #[test]
    fn test_post_serializes_camel_case() {
        let p = post("1", "2024-01-01T00:00:00Z");
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("replyCount").is_some());
        // Unset options are omitted entirely
        assert!(json.get("conversationId").is_none());
    }
}
