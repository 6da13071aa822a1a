//! Integration tests for the save store client.

use std::time::Duration;

use serde_json::json;
use timeline_thread_collector::model::Post;
use timeline_thread_collector::store::{SaveOptions, SaveStoreClient};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SaveStoreClient {
    SaveStoreClient::new(&server.uri(), Duration::from_secs(5)).expect("client builds")
}

fn post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        full_text: format!("post {id}"),
        ..Post::default()
    }
}

#[tokio::test]
async fn test_save_posts_reports_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/saved"))
        .and(body_partial_json(json!({"owner": "me"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "saved": 2,
            "skippedDuplicates": 1
        })))
        .mount(&server)
        .await;

    let outcome = client(&server)
        .save_posts("me", &[post("1"), post("2"), post("3")], SaveOptions::default())
        .await
        .expect("save succeeds");
    assert_eq!(outcome.saved, 2);
    assert_eq!(outcome.skipped_duplicates, 1);
}

#[tokio::test]
async fn test_save_rejected_by_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/saved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
        .mount(&server)
        .await;

    let result = client(&server)
        .save_posts("me", &[post("1")], SaveOptions::default())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_list_saved_flattens_thread_shaped_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/saved/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "items": [
                {"id": "1", "fullText": "flat post"},
                {"posts": [
                    {"id": "2", "fullText": "thread member"},
                    {"id": "3", "fullText": "thread member"}
                ]},
                {"fullText": "no id, dropped"}
            ]
        })))
        .mount(&server)
        .await;

    let posts = client(&server).list_saved("me").await.expect("list succeeds");
    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_list_saved_missing_owner_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/saved/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let posts = client(&server).list_saved("ghost").await.expect("404 tolerated");
    assert!(posts.is_empty());
}

#[tokio::test]
async fn test_delete_item_reports_presence() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/saved/item/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/saved/item/2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.delete_item("1").await.expect("delete succeeds"));
    assert!(!client.delete_item("2").await.expect("missing is not an error"));
}

#[tokio::test]
async fn test_delete_owner_propagates_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/saved/me"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(client(&server).delete_owner("me").await.is_err());
}
