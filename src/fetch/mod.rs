//! Fetch orchestration against the upstream proxy API.
//!
//! [`replies`] walks the reply pagination for a single post; [`timeline`]
//! drives the whole per-user fetch. Both go through the
//! [`RequestGateway`](crate::gateway::RequestGateway) and share the page
//! parsing and filtering helpers defined here.

mod replies;
mod timeline;

pub use timeline::{FetchOverrides, TimelineFetcher};

use std::time::Duration;

use serde_json::Value;

use crate::model::Post;
use crate::normalize::normalize_post;

/// URL builder for the upstream proxy endpoints. The base URL comes from
/// configuration so tests can point it at a mock server.
#[derive(Debug, Clone)]
pub struct UpstreamApi {
    base_url: String,
}

impl UpstreamApi {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn user_details_url(&self, handle: &str) -> String {
        format!(
            "{}/user/details?username={}",
            self.base_url,
            urlencoding::encode(handle)
        )
    }

    #[must_use]
    pub fn timeline_url(
        &self,
        user_id: &str,
        limit: usize,
        continuation_token: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}/user/tweets?user_id={}&limit={limit}",
            self.base_url,
            urlencoding::encode(user_id)
        );
        if let Some(token) = continuation_token {
            url.push_str("&continuation_token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    #[must_use]
    pub fn replies_url(&self, post_id: &str, continuation_token: Option<&str>) -> String {
        let mut url = format!(
            "{}/tweet/replies?tweet_id={}",
            self.base_url,
            urlencoding::encode(post_id)
        );
        if let Some(token) = continuation_token {
            url.push_str("&continuation_token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    #[must_use]
    pub fn post_details_url(&self, post_id: &str) -> String {
        format!(
            "{}/tweet/details?tweet_id={}",
            self.base_url,
            urlencoding::encode(post_id)
        )
    }
}

/// Inter-call delays the orchestrators insert on top of the gateway throttle.
/// The gateway guards against global hammering; these guard individual
/// resources against per-endpoint abuse thresholds.
#[derive(Debug, Clone)]
pub struct Delays {
    /// Between reply pages.
    pub reply_page: Duration,
    /// After any page or enrichment error.
    pub after_error: Duration,
    /// Between timeline continuation pages.
    pub continuation: Duration,
    /// Between per-post thread enrichments.
    pub enrichment: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            reply_page: Duration::from_millis(1000),
            after_error: Duration::from_millis(2500),
            continuation: Duration::from_millis(1500),
            enrichment: Duration::from_millis(1000),
        }
    }
}

impl Delays {
    /// Zero delays for tests.
    #[must_use]
    pub fn none() -> Self {
        Self {
            reply_page: Duration::ZERO,
            after_error: Duration::ZERO,
            continuation: Duration::ZERO,
            enrichment: Duration::ZERO,
        }
    }
}

/// One page of upstream results.
pub(crate) struct Page {
    pub posts: Vec<Post>,
    pub continuation_token: Option<String>,
}

/// Normalize a paginated upstream response. Records that fail to normalize
/// (no id) are dropped silently.
pub(crate) fn parse_page(value: &Value) -> Page {
    let records = value
        .get("results")
        .or_else(|| value.get("replies"))
        .and_then(Value::as_array);

    let posts = records
        .map(|records| records.iter().filter_map(normalize_post).collect())
        .unwrap_or_default();

    let continuation_token = value
        .get("continuation_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string);

    Page {
        posts,
        continuation_token,
    }
}

/// True when `text` opens by @mentioning someone other than `author_handle`.
/// Such posts address a side conversation and are excluded from thread
/// assembly. Known heuristic: this can false-negative on continuations that
/// legitimately open with a mention.
pub(crate) fn opens_with_foreign_mention(text: &str, author_handle: &str) -> bool {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('@') else {
        return false;
    };
    let mentioned: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if mentioned.is_empty() {
        return false;
    }
    !mentioned.eq_ignore_ascii_case(author_handle)
}

/// Case-insensitive author match on handle.
pub(crate) fn same_author(post: &Post, author_handle: &str) -> bool {
    post.author.handle.eq_ignore_ascii_case(author_handle)
}
