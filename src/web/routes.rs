use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::fetch::FetchOverrides;
use crate::model::{Post, TimelineItem};
use crate::store::SaveOptions;
use crate::threading::group_threads;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/timeline/:handle", get(timeline))
        .route("/api/post/:id", get(post_detail))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/save", post(save_posts))
        .route("/api/saved/:owner", get(list_saved).delete(delete_owner))
        .route("/api/saved/item/:id", delete(delete_item))
}

async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

// ========== Timeline ==========

#[derive(Debug, Deserialize)]
struct TimelineParams {
    filter: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
    limit: Option<usize>,
    max_total: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelinePage {
    handle: String,
    items: Vec<TimelineItem>,
    page: usize,
    page_size: usize,
    total_items: usize,
    total_posts: usize,
}

async fn timeline(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Response {
    let handle = handle.trim().trim_start_matches('@').to_string();
    if handle.is_empty() {
        return (StatusCode::BAD_REQUEST, "Handle cannot be empty").into_response();
    }

    let overrides = FetchOverrides {
        initial_limit: params.limit,
        max_total: params.max_total,
    };
    let posts = state.fetcher.fetch_user_posts(&handle, overrides).await;
    let total_posts = posts.len();
    let items = apply_filter(group_threads(posts), params.filter.as_deref());

    let total_items = items.len();
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    // page comes from the query string; the offset multiplication can overflow
    let offset = page.saturating_sub(1).saturating_mul(page_size);
    let items: Vec<TimelineItem> = items.into_iter().skip(offset).take(page_size).collect();

    Json(TimelinePage {
        handle,
        items,
        page,
        page_size,
        total_items,
        total_posts,
    })
    .into_response()
}

/// Narrow grouped items by the `filter` query parameter. Unknown values fall
/// back to `all`.
fn apply_filter(items: Vec<TimelineItem>, filter: Option<&str>) -> Vec<TimelineItem> {
    match filter {
        Some("threads") => items
            .into_iter()
            .filter(|i| matches!(i, TimelineItem::Thread(_)))
            .collect(),
        Some("posts") => items
            .into_iter()
            .filter(|i| matches!(i, TimelineItem::Post(_)))
            .collect(),
        Some("media") => items
            .into_iter()
            .filter(|item| match item {
                TimelineItem::Post(p) => p.has_media(),
                TimelineItem::Thread(t) => t.posts.iter().any(Post::has_media),
            })
            .collect(),
        _ => items,
    }
}

async fn post_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.fetcher.fetch_post_detail(&id).await {
        Some(post) => Json(post).into_response(),
        None => (StatusCode::NOT_FOUND, "Post not found").into_response(),
    }
}

// ========== Settings ==========

async fn get_settings(State(state): State<AppState>) -> Response {
    let settings = *state.settings.read().expect("settings lock poisoned");
    Json(settings).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsUpdate {
    initial_fetch_limit: Option<usize>,
    max_total_posts: Option<usize>,
    threads_to_enrich: Option<usize>,
    max_continuation_pages: Option<usize>,
    reply_page_cap: Option<usize>,
    retry_base_delay_ms: Option<u64>,
}

/// Apply a partial settings update. Out-of-range fields are ignored rather
/// than rejected; the response carries the settings actually in effect.
async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let applied = {
        let mut settings = state.settings.write().expect("settings lock poisoned");
        if let Some(v) = update.initial_fetch_limit {
            settings.set_initial_fetch_limit(v);
        }
        if let Some(v) = update.max_total_posts {
            settings.set_max_total_posts(v);
        }
        if let Some(v) = update.threads_to_enrich {
            settings.set_threads_to_enrich(v);
        }
        if let Some(v) = update.max_continuation_pages {
            settings.set_max_continuation_pages(v);
        }
        if let Some(v) = update.reply_page_cap {
            settings.set_reply_page_cap(v);
        }
        if let Some(v) = update.retry_base_delay_ms {
            settings.set_retry_base_delay_ms(v);
        }
        *settings
    };

    state
        .fetcher
        .gateway()
        .set_retry_base_delay(Duration::from_millis(applied.retry_base_delay_ms));

    Json(applied).into_response()
}

// ========== Save store ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest {
    owner: String,
    posts: Vec<Post>,
    #[serde(default)]
    options: Option<SaveOptions>,
}

async fn save_posts(State(state): State<AppState>, Json(request): Json<SaveRequest>) -> Response {
    let Some(store) = state.store.as_ref() else {
        return store_unconfigured();
    };
    if request.owner.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Owner cannot be empty").into_response();
    }
    if request.posts.is_empty() {
        return (StatusCode::BAD_REQUEST, "No posts to save").into_response();
    }

    let options = request.options.unwrap_or_default();
    match store
        .save_posts(&request.owner, &request.posts, options)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            error!("Save request failed: {e:#}");
            (StatusCode::BAD_GATEWAY, "Save store error").into_response()
        }
    }
}

/// Saved items come back flat; thread structure is recomputed here so the
/// saved view groups exactly like the live timeline.
async fn list_saved(State(state): State<AppState>, Path(owner): Path<String>) -> Response {
    let Some(store) = state.store.as_ref() else {
        return store_unconfigured();
    };
    match store.list_saved(&owner).await {
        Ok(posts) => {
            let items = group_threads(posts);
            Json(json!({"owner": owner, "items": items})).into_response()
        }
        Err(e) => {
            error!("Saved list failed: {e:#}");
            (StatusCode::BAD_GATEWAY, "Save store error").into_response()
        }
    }
}

async fn delete_item(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(store) = state.store.as_ref() else {
        return store_unconfigured();
    };
    match store.delete_item(&id).await {
        Ok(true) => Json(json!({"deleted": true})).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Saved item not found").into_response(),
        Err(e) => {
            error!("Saved item delete failed: {e:#}");
            (StatusCode::BAD_GATEWAY, "Save store error").into_response()
        }
    }
}

async fn delete_owner(State(state): State<AppState>, Path(owner): Path<String>) -> Response {
    let Some(store) = state.store.as_ref() else {
        return store_unconfigured();
    };
    match store.delete_owner(&owner).await {
        Ok(true) => Json(json!({"deleted": true})).into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Nothing saved for owner").into_response(),
        Err(e) => {
            error!("Saved owner delete failed: {e:#}");
            (StatusCode::BAD_GATEWAY, "Save store error").into_response()
        }
    }
}

fn store_unconfigured() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Save store not configured").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Thread};

    fn post(id: &str, media: bool) -> Post {
        Post {
            id: id.to_string(),
            media: if media {
                vec![crate::model::Media {
                    key: format!("media-{id}-0"),
                    kind: crate::model::MediaKind::Photo,
                    url: "https://example.com/p.jpg".to_string(),
                    preview_url: String::new(),
                }]
            } else {
                Vec::new()
            },
            ..Post::default()
        }
    }

    fn thread(id: &str, posts: Vec<Post>) -> TimelineItem {
        TimelineItem::Thread(Thread {
            id: id.to_string(),
            author: Author::default(),
            created_at: String::new(),
            posts,
        })
    }

    #[test]
    fn test_filter_threads_and_posts() {
        let items = vec![
            TimelineItem::Post(post("1", false)),
            thread("t", vec![post("2", false), post("3", false)]),
        ];
        assert_eq!(apply_filter(items.clone(), Some("threads")).len(), 1);
        assert_eq!(apply_filter(items.clone(), Some("posts")).len(), 1);
        assert_eq!(apply_filter(items.clone(), Some("bogus")).len(), 2);
        assert_eq!(apply_filter(items, None).len(), 2);
    }

    #[test]
    fn test_filter_media_inspects_thread_members() {
        let items = vec![
            TimelineItem::Post(post("1", false)),
            thread("t", vec![post("2", false), post("3", true)]),
        ];
        let filtered = apply_filter(items, Some("media"));
        assert_eq!(filtered.len(), 1);
        assert!(matches!(filtered[0], TimelineItem::Thread(_)));
    }
}
