//! Per-user timeline fetch orchestration.
//!
//! Pipeline: resolve the user id, fetch the initial page, eagerly enrich the
//! highest-engagement posts with their reply chains, then follow the
//! continuation cursor until the post ceiling or page cap is reached.
//! Failures of individual pages or enrichments are isolated; only a failed
//! user resolution (or an unexpected top-level error) empties the result.

use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::FetchSettings;
use crate::constants::{CONTINUATION_ENRICHMENT_LIMIT, ENRICHMENT_REPLY_FLOOR};
use crate::error::FetchError;
use crate::gateway::RequestGateway;
use crate::model::Post;
use crate::normalize::normalize_post;

use super::replies::fetch_reply_chain;
use super::{opens_with_foreign_mention, parse_page, same_author, Delays, UpstreamApi};

/// Per-call overrides for the configured fetch limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOverrides {
    pub initial_limit: Option<usize>,
    pub max_total: Option<usize>,
}

/// Drives the fetch pipeline for one upstream account.
pub struct TimelineFetcher {
    gateway: Arc<RequestGateway>,
    api: UpstreamApi,
    settings: Arc<RwLock<FetchSettings>>,
    delays: Delays,
}

impl TimelineFetcher {
    #[must_use]
    pub fn new(
        gateway: Arc<RequestGateway>,
        api: UpstreamApi,
        settings: Arc<RwLock<FetchSettings>>,
    ) -> Self {
        Self {
            gateway,
            api,
            settings,
            delays: Delays::default(),
        }
    }

    /// Replace the inter-call delays (tests use [`Delays::none`]).
    #[must_use]
    pub fn with_delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    fn settings_snapshot(&self) -> FetchSettings {
        *self.settings.read().expect("settings lock poisoned")
    }

    /// Fetch a user's posts, deduplicated by id.
    ///
    /// Results are cached by lowercase handle for the life of the gateway; a
    /// repeat call performs no network activity. Never fails: any unhandled
    /// pipeline error yields an empty list.
    pub async fn fetch_user_posts(&self, handle: &str, overrides: FetchOverrides) -> Vec<Post> {
        if let Some(cached) = self.gateway.cached_timeline(handle) {
            debug!(handle = %handle, posts = cached.len(), "Timeline served from session cache");
            return cached;
        }

        match self.fetch_pipeline(handle, overrides).await {
            Ok(posts) => {
                info!(handle = %handle, posts = posts.len(), "Timeline fetch complete");
                self.gateway.store_timeline(handle, posts.clone());
                posts
            }
            Err(e) => {
                warn!(handle = %handle, error = %e, "Timeline fetch failed");
                Vec::new()
            }
        }
    }

    /// Fetch one post's details, going to the network only on a cache miss.
    pub async fn fetch_post_detail(&self, post_id: &str) -> Option<Post> {
        if let Some(post) = self.gateway.cached_post(post_id) {
            return Some(post);
        }
        let url = self.api.post_details_url(post_id);
        let value = match self.gateway.request(&url).await {
            Ok(value) => value,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Post detail fetch failed");
                return None;
            }
        };
        let record = value.get("tweet").unwrap_or(&value);
        let post = normalize_post(record)?;
        self.gateway.store_post(post.clone());
        Some(post)
    }

    /// Walk the reply chain for one post (same-author continuations only).
    pub async fn fetch_replies(&self, post_id: &str, author_handle: &str) -> Vec<Post> {
        let settings = self.settings_snapshot();
        fetch_reply_chain(
            &self.gateway,
            &self.api,
            settings.reply_page_cap,
            &self.delays,
            post_id,
            author_handle,
        )
        .await
        .posts
    }

    async fn fetch_pipeline(
        &self,
        handle: &str,
        overrides: FetchOverrides,
    ) -> Result<Vec<Post>, FetchError> {
        let settings = self.settings_snapshot();
        let initial_limit = overrides
            .initial_limit
            .unwrap_or(settings.initial_fetch_limit)
            .clamp(1, 100);
        let max_total = overrides.max_total.unwrap_or(settings.max_total_posts);

        // ResolveUser
        let user_id = self.resolve_user_id(handle).await?;
        debug!(handle = %handle, user_id = %user_id, "Resolved user");

        // InitialFetch
        let url = self.api.timeline_url(&user_id, initial_limit, None);
        let page = parse_page(&self.gateway.request(&url).await?);
        let mut accumulator = Accumulator::new(handle);
        accumulator.extend(page.posts);
        let mut continuation_token = page.continuation_token;

        // ThreadEnrichment: expand the highest-engagement posts up front
        let candidates = top_by_reply_count(accumulator.posts(), settings.threads_to_enrich);
        self.enrich(&mut accumulator, &candidates, settings.reply_page_cap)
            .await;

        // ContinuationLoop
        let mut continuation_attempts = 0usize;
        while let Some(token) = continuation_token.take() {
            if accumulator.len() >= max_total
                || continuation_attempts >= settings.max_continuation_pages
            {
                break;
            }
            continuation_attempts += 1;
            sleep(self.delays.continuation).await;

            let url = self.api.timeline_url(&user_id, initial_limit, Some(&token));
            let value = match self.gateway.request(&url).await {
                Ok(value) => value,
                Err(e) => {
                    // A continuation failure aborts the loop, not the fetch
                    warn!(handle = %handle, error = %e, "Continuation page failed, returning partial result");
                    break;
                }
            };
            let page = parse_page(&value);
            let new_posts = accumulator.extend(page.posts);
            continuation_token = page.continuation_token;

            // Enrich the most-discussed newly discovered posts
            let worth_enriching: Vec<(String, String)> = {
                let mut fresh: Vec<&Post> = accumulator
                    .posts()
                    .iter()
                    .filter(|p| new_posts.contains(&p.id))
                    .filter(|p| p.reply_count > ENRICHMENT_REPLY_FLOOR)
                    .collect();
                fresh.sort_by(|a, b| b.reply_count.cmp(&a.reply_count));
                fresh
                    .iter()
                    .take(CONTINUATION_ENRICHMENT_LIMIT)
                    .map(|p| (p.id.clone(), p.author.handle.clone()))
                    .collect()
            };
            self.enrich(&mut accumulator, &worth_enriching, settings.reply_page_cap)
                .await;
        }

        Ok(accumulator.into_posts())
    }

    /// Expand each candidate post's reply chain, isolating per-post failures.
    /// A longer delay follows an abandoned chain; a failed enrichment never
    /// aborts the batch.
    async fn enrich(
        &self,
        accumulator: &mut Accumulator,
        candidates: &[(String, String)],
        reply_page_cap: usize,
    ) {
        for (index, (post_id, author_handle)) in candidates.iter().enumerate() {
            if index > 0 {
                sleep(self.delays.enrichment).await;
            }
            let chain = fetch_reply_chain(
                &self.gateway,
                &self.api,
                reply_page_cap,
                &self.delays,
                post_id,
                author_handle,
            )
            .await;
            if chain.errored {
                warn!(post_id = %post_id, "Thread enrichment failed, skipping post");
                sleep(self.delays.after_error).await;
            }
            accumulator.append_replies(chain.posts);
        }
    }

    async fn resolve_user_id(&self, handle: &str) -> Result<String, FetchError> {
        let url = self.api.user_details_url(handle);
        let value = self.gateway.request(&url).await?;
        user_id_from(&value).ok_or_else(|| FetchError::UserNotFound(handle.to_string()))
    }
}

/// Pull the numeric user id out of the user-details response, tolerating the
/// shapes different proxy versions emit.
fn user_id_from(value: &Value) -> Option<String> {
    let candidate = value
        .get("user_id")
        .or_else(|| value.get("user").and_then(|u| u.get("user_id")))
        .or_else(|| value.get("id_str"))
        .or_else(|| value.get("id"))?;
    match candidate {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn top_by_reply_count(posts: &[Post], count: usize) -> Vec<(String, String)> {
    let mut ranked: Vec<&Post> = posts.iter().collect();
    ranked.sort_by(|a, b| b.reply_count.cmp(&a.reply_count));
    ranked
        .iter()
        .take(count)
        .map(|p| (p.id.clone(), p.author.handle.clone()))
        .collect()
}

/// Ordered, id-deduplicated collection of accepted posts for one handle.
struct Accumulator {
    handle: String,
    posts: Vec<Post>,
    seen: std::collections::HashSet<String>,
}

impl Accumulator {
    fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            posts: Vec::new(),
            seen: std::collections::HashSet::new(),
        }
    }

    fn len(&self) -> usize {
        self.posts.len()
    }

    fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// Accept timeline posts: same author, not opening with a foreign
    /// mention, not seen before. Returns ids of newly accepted posts.
    fn extend(&mut self, posts: Vec<Post>) -> std::collections::HashSet<String> {
        let mut fresh = std::collections::HashSet::new();
        for post in posts {
            if !same_author(&post, &self.handle) {
                continue;
            }
            if opens_with_foreign_mention(&post.full_text, &self.handle) {
                continue;
            }
            if self.seen.insert(post.id.clone()) {
                fresh.insert(post.id.clone());
                self.posts.push(post);
            }
        }
        fresh
    }

    /// Append enrichment replies that are not already present.
    fn append_replies(&mut self, replies: Vec<Post>) {
        for reply in replies {
            if self.seen.insert(reply.id.clone()) {
                self.posts.push(reply);
            }
        }
    }

    fn into_posts(self) -> Vec<Post> {
        self.posts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_id_from_shapes() {
        assert_eq!(user_id_from(&json!({"user_id": "42"})).as_deref(), Some("42"));
        assert_eq!(user_id_from(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(
            user_id_from(&json!({"user": {"user_id": "7"}})).as_deref(),
            Some("7")
        );
        assert!(user_id_from(&json!({})).is_none());
        assert!(user_id_from(&json!({"user_id": ""})).is_none());
    }

    #[test]
    fn test_accumulator_filters_and_dedupes() {
        let mut acc = Accumulator::new("author");
        let make = |id: &str, handle: &str, text: &str| Post {
            id: id.to_string(),
            full_text: text.to_string(),
            author: crate::model::Author {
                handle: handle.to_string(),
                ..crate::model::Author::default()
            },
            ..Post::default()
        };
        let fresh = acc.extend(vec![
            make("1", "author", "mine"),
            make("2", "Other", "not mine"),
            make("3", "AUTHOR", "case insensitive"),
            make("1", "author", "duplicate"),
            make("4", "author", "@someone side conversation"),
        ]);
        assert_eq!(acc.len(), 2);
        assert!(fresh.contains("1") && fresh.contains("3"));
    }
}
