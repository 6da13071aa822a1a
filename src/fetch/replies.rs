//! Reply-chain walking for a single root post.
//!
//! Pages through the upstream replies cursor, keeping only same-author
//! continuations, and assembles them into an ordered sub-thread.

use std::collections::HashSet;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::constants::LARGE_REPLY_PAGE;
use crate::gateway::RequestGateway;
use crate::model::{chronological, Post};

use super::{opens_with_foreign_mention, parse_page, same_author, Delays, UpstreamApi};

/// Consecutive page-fetch errors tolerated before abandoning the chain.
/// Resets after any successful page.
const MAX_ERROR_ATTEMPTS: u32 = 3;

/// Result of one reply-chain walk. `errored` is set when the walk was
/// abandoned on exhausted attempts, so the caller can apply its longer
/// inter-post delay.
pub(crate) struct ReplyChain {
    pub posts: Vec<Post>,
    pub errored: bool,
}

/// Walk the replies cursor for `post_id`, returning the author's own
/// continuations ordered oldest to newest with positions assigned.
///
/// Errors never propagate: a failed page is retried after a backoff delay,
/// and once the attempt budget is exhausted the chain is abandoned and
/// whatever was gathered so far is returned.
pub(crate) async fn fetch_reply_chain(
    gateway: &RequestGateway,
    api: &UpstreamApi,
    page_cap: usize,
    delays: &Delays,
    post_id: &str,
    author_handle: &str,
) -> ReplyChain {
    let mut collected: Vec<Post> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut continuation_token: Option<String> = None;
    let mut error_attempts: u32 = 0;
    let mut pages_fetched = 0usize;
    let mut abandoned = false;

    while pages_fetched < page_cap {
        // Stay under the upstream's per-resource abuse threshold regardless
        // of the gateway's own throttle.
        if pages_fetched > 0 {
            sleep(delays.reply_page).await;
        }

        let url = api.replies_url(post_id, continuation_token.as_deref());
        let value = match gateway.request(&url).await {
            Ok(value) => value,
            Err(e) => {
                error_attempts += 1;
                warn!(post_id = %post_id, attempt = error_attempts, error = %e, "Reply page fetch failed");
                if error_attempts >= MAX_ERROR_ATTEMPTS || e.is_skip() {
                    // Abort the whole chain for this root post
                    abandoned = true;
                    break;
                }
                sleep(delays.after_error).await;
                continue;
            }
        };

        error_attempts = 0;
        pages_fetched += 1;

        let page = parse_page(&value);
        let raw_count = page.posts.len();
        let mut accepted = 0usize;

        for post in page.posts {
            if !same_author(&post, author_handle) {
                continue;
            }
            if seen.contains(&post.id) {
                continue;
            }
            // A reply opening by addressing someone else is a side
            // conversation, not a thread continuation.
            if opens_with_foreign_mention(&post.full_text, author_handle) {
                continue;
            }
            seen.insert(post.id.clone());
            collected.push(post);
            accepted += 1;
        }

        continuation_token = page.continuation_token;
        if continuation_token.is_none() {
            break;
        }
        if accepted == 0 && raw_count < LARGE_REPLY_PAGE {
            // Nothing accepted and the page was small: later pages are
            // unlikely to hold buried author replies.
            break;
        }
    }

    collected.sort_by(chronological);
    for (index, post) in collected.iter_mut().enumerate() {
        post.thread_position = Some(index);
        post.thread_index = Some(index);
    }

    debug!(post_id = %post_id, replies = collected.len(), pages = pages_fetched, "Reply chain assembled");
    ReplyChain {
        posts: collected,
        errored: abandoned,
    }
}
