//! Integration tests for the timeline fetch pipeline.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use timeline_thread_collector::config::FetchSettings;
use timeline_thread_collector::fetch::{Delays, FetchOverrides, TimelineFetcher, UpstreamApi};
use timeline_thread_collector::gateway::{GatewayConfig, RequestGateway};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_gateway() -> Arc<RequestGateway> {
    Arc::new(RequestGateway::new(GatewayConfig {
        min_interval: Duration::from_millis(1),
        retry_base_delay: Duration::from_millis(1),
        max_retries: 0,
        failure_ttl: Duration::from_secs(600),
        rate_limit_hold: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
    }))
}

fn test_fetcher(server: &MockServer, settings: FetchSettings) -> TimelineFetcher {
    TimelineFetcher::new(
        fast_gateway(),
        UpstreamApi::new(&server.uri()),
        Arc::new(RwLock::new(settings)),
    )
    .with_delays(Delays::none())
}

/// Settings with enrichment disabled so timeline tests only hit the
/// endpoints they mock.
fn no_enrichment() -> FetchSettings {
    let mut settings = FetchSettings::default();
    settings.set_threads_to_enrich(0);
    settings
}

fn tweet(id: &str, handle: &str, text: &str) -> Value {
    json!({
        "tweet_id": id,
        "text": text,
        "creation_date": "2024-01-15T12:00:00Z",
        "user": {"user_id": "42", "name": "Alice", "username": handle}
    })
}

async fn mock_user_details(server: &MockServer, handle: &str) {
    Mock::given(method("GET"))
        .and(path("/user/details"))
        .and(query_param("username", handle))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "42"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_user_posts_single_page() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .and(query_param("user_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                tweet("1", "alice", "first"),
                tweet("2", "alice", "second"),
                tweet("3", "bob", "interloper"),
            ],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let posts = fetcher
        .fetch_user_posts("alice", FetchOverrides::default())
        .await;

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"], "other authors are filtered out");
}

#[tokio::test]
async fn test_unknown_user_yields_empty_timeline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/details"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let posts = fetcher
        .fetch_user_posts("nobody", FetchOverrides::default())
        .await;
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_dedup_across_continuation_pages() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    // Continuation page mounted first so its matcher wins when the token is set
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .and(query_param("continuation_token", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                tweet("2", "alice", "overlap from page one"),
                tweet("3", "alice", "new on page two"),
            ],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [tweet("1", "alice", "a"), tweet("2", "alice", "b")],
            "continuation_token": "t1"
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let posts = fetcher
        .fetch_user_posts("alice", FetchOverrides::default())
        .await;

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_continuation_failure_returns_partial_result() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .and(query_param("continuation_token", "t1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [tweet("1", "alice", "kept")],
            "continuation_token": "t1"
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let posts = fetcher
        .fetch_user_posts("alice", FetchOverrides::default())
        .await;

    assert_eq!(posts.len(), 1, "page one survives a failed continuation");
    assert_eq!(posts[0].id, "1");
}

#[tokio::test]
async fn test_session_cache_short_circuits_repeat_fetch() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [tweet("1", "alice", "cached")],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let first = fetcher
        .fetch_user_posts("alice", FetchOverrides::default())
        .await;
    let requests_after_first = server.received_requests().await.unwrap().len();

    // Case-insensitive cache hit, no further network activity
    let second = fetcher
        .fetch_user_posts("ALICE", FetchOverrides::default())
        .await;
    let requests_after_second = server.received_requests().await.unwrap().len();

    assert_eq!(first.len(), second.len());
    assert_eq!(requests_after_first, requests_after_second);
}

#[tokio::test]
async fn test_enrichment_appends_reply_chain() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "tweet_id": "1",
                "text": "thread root",
                "reply_count": 5,
                "creation_date": "2024-01-15T12:00:00Z",
                "user": {"user_id": "42", "username": "alice"}
            }],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tweet/replies"))
        .and(query_param("tweet_id", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replies": [
                tweet("2", "alice", "continuation"),
                tweet("3", "bob", "someone else's reply"),
            ],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;

    let mut settings = FetchSettings::default();
    settings.set_threads_to_enrich(1);
    let fetcher = test_fetcher(&server, settings);
    let posts = fetcher
        .fetch_user_posts("alice", FetchOverrides::default())
        .await;

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"], "own continuation appended, foreign reply dropped");
}

#[tokio::test]
async fn test_reply_walk_respects_page_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tweet/replies"))
        .and(query_param("continuation_token", "next1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replies": [tweet("11", "alice", "page two reply")],
            "continuation_token": "next2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tweet/replies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replies": [tweet("10", "alice", "page one reply")],
            "continuation_token": "next1"
        })))
        .mount(&server)
        .await;

    let mut settings = FetchSettings::default();
    settings.set_reply_page_cap(2);
    let fetcher = test_fetcher(&server, settings);
    let replies = fetcher.fetch_replies("1", "alice").await;

    assert_eq!(replies.len(), 2);
    // A token was still pending, but the cap stopped the walk
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(replies[0].thread_position, Some(0));
    assert_eq!(replies[1].thread_position, Some(1));
}

#[tokio::test]
async fn test_replies_drop_foreign_mention_openers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tweet/replies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "replies": [
                tweet("10", "alice", "@bob taking this elsewhere"),
                tweet("11", "alice", "@alice continuing my own thread"),
                tweet("12", "alice", "plain continuation"),
            ],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, FetchSettings::default());
    let replies = fetcher.fetch_replies("1", "alice").await;

    let ids: Vec<&str> = replies.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["11", "12"]);
}

#[tokio::test]
async fn test_post_detail_cached_after_first_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tweet/details"))
        .and(query_param("tweet_id", "99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tweet": tweet("99", "alice", "the details")
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let first = fetcher.fetch_post_detail("99").await.expect("post found");
    assert_eq!(first.full_text, "the details");

    let requests = server.received_requests().await.unwrap().len();
    let second = fetcher.fetch_post_detail("99").await.expect("cache hit");
    assert_eq!(second.id, first.id);
    assert_eq!(server.received_requests().await.unwrap().len(), requests);
}

#[tokio::test]
async fn test_initial_limit_override_clamped_into_request() {
    let server = MockServer::start().await;
    mock_user_details(&server, "alice").await;
    Mock::given(method("GET"))
        .and(path("/user/tweets"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [tweet("1", "alice", "a")],
            "continuation_token": ""
        })))
        .mount(&server)
        .await;

    let fetcher = test_fetcher(&server, no_enrichment());
    let posts = fetcher
        .fetch_user_posts(
            "alice",
            FetchOverrides {
                initial_limit: Some(500),
                max_total: None,
            },
        )
        .await;
    assert_eq!(posts.len(), 1, "oversized limit clamped to 100");
}
