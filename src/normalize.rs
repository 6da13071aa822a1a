//! Mapping of raw upstream API records into canonical [`Post`] entities.
//!
//! The proxy's record shape drifts between endpoints: text may live in any of
//! four fields, media may arrive as bare URLs or entity objects, and counters
//! use both `*_count` and legacy names. Everything here is a pure mapping with
//! no side effects.

use serde_json::Value;
use tracing::debug;

use crate::model::{Author, Media, MediaKind, Post};
use crate::text::{clean_text, detect_truncation};

/// Character count above which a post is considered long-form.
const SHORT_FORM_LIMIT: usize = 240;

/// Map one raw record into a [`Post`]. Returns `None` when the record carries
/// no usable id.
#[must_use]
pub fn normalize_post(raw: &Value) -> Option<Post> {
    let id = string_or_number(raw, &["tweet_id", "id_str", "id"])?;

    let author = normalize_author(raw.get("user").unwrap_or(&Value::Null));

    let raw_text = first_nonempty_text(raw);
    let short_text = text_field(raw, "text").unwrap_or_else(|| raw_text.clone());
    let full_text = clean_text(&raw_text);

    let in_reply_to_post_id =
        string_or_number(raw, &["in_reply_to_status_id", "in_reply_to_post_id"]);
    let in_reply_to_user_id = string_or_number(raw, &["in_reply_to_user_id"]);

    // A post with no conversation info is its own conversation root.
    let conversation_id = string_or_number(raw, &["conversation_id"])
        .or_else(|| in_reply_to_post_id.clone())
        .or_else(|| Some(id.clone()));
    let thread_id = string_or_number(raw, &["thread_id"]).or_else(|| conversation_id.clone());

    let is_self_thread = in_reply_to_user_id
        .as_deref()
        .is_some_and(|uid| !author.id.is_empty() && uid == author.id);

    let is_long = raw_text.chars().count() > SHORT_FORM_LIMIT || detect_truncation(&full_text);

    let media = extract_media(raw, &id);
    if media.is_empty() && raw.get("extended_entities").is_some() {
        debug!(post_id = %id, "Record has extended entities but no extractable media");
    }

    Some(Post {
        id,
        author,
        text: short_text,
        full_text,
        created_at: text_field(raw, "creation_date")
            .or_else(|| text_field(raw, "created_at"))
            .unwrap_or_default(),
        media,
        reply_count: count_field(raw, &["reply_count"]),
        retweet_count: count_field(raw, &["retweet_count"]),
        favorite_count: count_field(raw, &["favorite_count", "like_count"]),
        quote_count: count_field(raw, &["quote_count"]),
        conversation_id,
        thread_id,
        in_reply_to_post_id,
        in_reply_to_user_id,
        is_self_thread,
        is_long,
        thread_position: None,
        thread_index: None,
        saved_at: None,
        saved_by: None,
    })
}

fn normalize_author(user: &Value) -> Author {
    Author {
        id: string_or_number(user, &["user_id", "id_str", "id"]).unwrap_or_default(),
        display_name: text_field(user, "name").unwrap_or_default(),
        handle: text_field(user, "username")
            .or_else(|| text_field(user, "screen_name"))
            .unwrap_or_default(),
        avatar_url: text_field(user, "profile_pic_url")
            .or_else(|| text_field(user, "profile_image_url_https"))
            .unwrap_or_default(),
    }
}

/// Prioritized text lookup: `extended_text`, `extended_tweet.full_text`,
/// `full_text`, then `text`; first non-empty wins.
fn first_nonempty_text(raw: &Value) -> String {
    text_field(raw, "extended_text")
        .or_else(|| {
            raw.get("extended_tweet")
                .and_then(|ext| text_field(ext, "full_text"))
        })
        .or_else(|| text_field(raw, "full_text"))
        .or_else(|| text_field(raw, "text"))
        .unwrap_or_default()
}

/// Merge the three possible media sources: already-resolved URLs, extended
/// entity media, and basic entity media, in that order. Entries are keyed
/// `media-{postId}-{index}` when the source lacks a key, and deduplicated by
/// URL across sources.
fn extract_media(raw: &Value, post_id: &str) -> Vec<Media> {
    let mut media = Vec::new();
    let mut seen_urls = Vec::new();

    if let Some(urls) = raw.get("media_url").and_then(Value::as_array) {
        for url in urls.iter().filter_map(Value::as_str) {
            push_media(&mut media, &mut seen_urls, post_id, None, url, None);
        }
    }

    for source in ["extended_entities", "entities"] {
        let Some(entries) = raw
            .get(source)
            .and_then(|e| e.get("media"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for entry in entries {
            let Some(url) = entry
                .get("media_url_https")
                .or_else(|| entry.get("media_url"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let key = entry
                .get("media_key")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            // Prefer the actual video variant URL for playback when present
            let video_url = entry
                .get("video_info")
                .and_then(|info| info.get("variants"))
                .and_then(Value::as_array)
                .and_then(|variants| {
                    variants
                        .iter()
                        .filter_map(|v| v.get("url").and_then(Value::as_str))
                        .find(|u| u.contains(".mp4"))
                });
            push_media(&mut media, &mut seen_urls, post_id, key, url, video_url);
        }
    }

    media
}

fn push_media(
    media: &mut Vec<Media>,
    seen_urls: &mut Vec<String>,
    post_id: &str,
    key: Option<String>,
    url: &str,
    video_url: Option<&str>,
) {
    let playback_url = video_url.unwrap_or(url);
    if seen_urls.iter().any(|u| u == playback_url || u == url) {
        return;
    }
    seen_urls.push(url.to_string());
    if playback_url != url {
        seen_urls.push(playback_url.to_string());
    }
    let index = media.len();
    media.push(Media {
        key: key.unwrap_or_else(|| format!("media-{post_id}-{index}")),
        kind: classify_media(playback_url),
        url: playback_url.to_string(),
        preview_url: url.to_string(),
    });
}

/// Classify media by URL pattern.
fn classify_media(url: &str) -> MediaKind {
    if url.contains(".mp4") || url.contains("/video/") {
        MediaKind::Video
    } else if url.contains(".gif") {
        MediaKind::AnimatedGif
    } else {
        MediaKind::Photo
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Read a field that may be serialized as either a JSON string or a number.
fn string_or_number(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn count_field(value: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_u64))
        .unwrap_or(0)
}
