//! Client for the external save store service.
//!
//! The store persists flat posts only; thread structure is re-derived by the
//! grouping engine whenever saved items are read back. The service is
//! optional, so every handler gates on its presence.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::constants::PROXY_USER_AGENT;
use crate::model::Post;

/// Flags forwarded with a save request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    /// Keep items already stored for the owner instead of replacing them.
    pub preserve_existing: bool,
    /// Drop posts whose id the store already holds.
    pub skip_duplicates: bool,
    /// Keep thread positions on the stored records.
    pub preserve_thread_order: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            preserve_existing: true,
            skip_duplicates: true,
            preserve_thread_order: true,
        }
    }
}

/// What the store reported back for one save call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub saved: usize,
    pub skipped_duplicates: usize,
}

/// HTTP client for the save store.
pub struct SaveStoreClient {
    client: Client,
    base_url: String,
}

impl SaveStoreClient {
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(PROXY_USER_AGENT)
            .build()
            .context("Failed to create save store HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Persist `posts` for `owner`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses, or a response the
    /// store marks unsuccessful.
    pub async fn save_posts(
        &self,
        owner: &str,
        posts: &[Post],
        options: SaveOptions,
    ) -> Result<SaveOutcome> {
        let url = format!("{}/saved", self.base_url);
        debug!(owner = %owner, posts = posts.len(), "Saving posts to store");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "owner": owner,
                "posts": posts,
                "options": options,
            }))
            .send()
            .await
            .context("Failed to reach save store")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Save store returned {status} for save request");
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse save store response")?;
        if !body_success(&body) {
            bail!("Save store rejected the save request");
        }

        let outcome = SaveOutcome {
            saved: count_field(&body, "saved").unwrap_or(posts.len()),
            skipped_duplicates: count_field(&body, "skippedDuplicates")
                .or_else(|| count_field(&body, "skipped_duplicates"))
                .unwrap_or(0),
        };
        info!(
            owner = %owner,
            saved = outcome.saved,
            skipped = outcome.skipped_duplicates,
            "Posts saved"
        );
        Ok(outcome)
    }

    /// Fetch everything saved for `owner` as a flat post list.
    ///
    /// Older store versions return pre-grouped items carrying a `posts`
    /// array; those are flattened so the caller can regroup uniformly.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a malformed response.
    pub async fn list_saved(&self, owner: &str) -> Result<Vec<Post>> {
        let url = format!(
            "{}/saved/{}",
            self.base_url,
            urlencoding::encode(owner)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach save store")?;

        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let status = response.status();
        if !status.is_success() {
            bail!("Save store returned {status} for list request");
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse save store response")?;
        let items = body
            .get("items")
            .or_else(|| body.get("posts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut posts = Vec::new();
        for item in items {
            if let Some(nested) = item.get("posts").and_then(Value::as_array) {
                for record in nested {
                    push_post(&mut posts, record);
                }
            } else {
                push_post(&mut posts, &item);
            }
        }
        debug!(owner = %owner, posts = posts.len(), "Loaded saved posts");
        Ok(posts)
    }

    /// Delete one saved item by id.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-success status other than 404.
    pub async fn delete_item(&self, item_id: &str) -> Result<bool> {
        let url = format!(
            "{}/saved/item/{}",
            self.base_url,
            urlencoding::encode(item_id)
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to reach save store")?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(false);
        }
        if !status.is_success() {
            bail!("Save store returned {status} for item delete");
        }
        info!(item_id = %item_id, "Saved item deleted");
        Ok(true)
    }

    /// Delete everything saved for `owner`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-success status other than 404.
    pub async fn delete_owner(&self, owner: &str) -> Result<bool> {
        let url = format!(
            "{}/saved/{}",
            self.base_url,
            urlencoding::encode(owner)
        );
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to reach save store")?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(false);
        }
        if !status.is_success() {
            bail!("Save store returned {status} for owner delete");
        }
        info!(owner = %owner, "Saved items cleared for owner");
        Ok(true)
    }
}

/// Missing `success` means an older store version; treat as success.
fn body_success(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool).unwrap_or(true)
}

fn count_field(body: &Value, name: &str) -> Option<usize> {
    body.get(name)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

fn push_post(posts: &mut Vec<Post>, record: &Value) {
    match serde_json::from_value::<Post>(record.clone()) {
        Ok(post) if !post.id.is_empty() => posts.push(post),
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Dropping malformed saved record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_success_defaults_true() {
        assert!(body_success(&json!({})));
        assert!(body_success(&json!({"success": true})));
        assert!(!body_success(&json!({"success": false})));
    }

    #[test]
    fn test_count_field() {
        let body = json!({"saved": 3, "skippedDuplicates": 1});
        assert_eq!(count_field(&body, "saved"), Some(3));
        assert_eq!(count_field(&body, "skippedDuplicates"), Some(1));
        assert_eq!(count_field(&body, "missing"), None);
    }

    #[test]
    fn test_push_post_requires_id() {
        let mut posts = Vec::new();
        push_post(&mut posts, &json!({"id": "1", "text": "hi"}));
        push_post(&mut posts, &json!({"id": "", "text": "anonymous"}));
        push_post(&mut posts, &json!("not an object"));
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "1");
    }

    #[test]
    fn test_save_options_defaults() {
        let options = SaveOptions::default();
        assert!(options.preserve_existing);
        assert!(options.skip_duplicates);
        assert!(options.preserve_thread_order);
    }
}
