use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;
use shared_database::{ChangeOp, HttpStore, MemoryStore, SharedStore};

fn config_for(url: &str) -> AppConfig {
    AppConfig {
        store_url: url.to_string(),
        store_anon_key: "test-anon-key".to_string(),
        store_jwt_secret: "test-secret".to_string(),
        signaling_base_url: String::new(),
        signaling_api_token: String::new(),
        poll_interval_seconds: 1,
        connect_timeout_seconds: 30,
        short_drop_seconds: 5,
    }
}

#[tokio::test]
async fn memory_store_reads_only_matching_rows() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();

    store
        .insert("widgets", json!({ "id": id, "color": "red" }))
        .await
        .unwrap();
    store
        .insert("widgets", json!({ "id": Uuid::new_v4(), "color": "blue" }))
        .await
        .unwrap();

    let rows = store
        .read("widgets", &[("color", "red".to_string())])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], json!(id));
}

#[tokio::test]
async fn memory_store_conditional_write_applies_once() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();

    store
        .insert("counters", json!({ "id": id, "value": 0, "version": 1 }))
        .await
        .unwrap();

    let filters = [("id", id.to_string())];

    let first = store
        .update_if("counters", &filters, 1, json!({ "value": 1, "version": 2 }))
        .await
        .unwrap();
    assert!(first);

    // Same expected version again: the row moved on, so the write loses.
    let second = store
        .update_if("counters", &filters, 1, json!({ "value": 99, "version": 2 }))
        .await
        .unwrap();
    assert!(!second);

    let rows = store.read("counters", &filters).await.unwrap();
    assert_eq!(rows[0]["value"], json!(1));
    assert_eq!(rows[0]["version"], json!(2));
}

#[tokio::test]
async fn memory_store_publishes_changes_in_write_order() {
    let store = MemoryStore::new();
    let mut feed = store.subscribe("events");

    store
        .insert("events", json!({ "id": 1, "version": 1 }))
        .await
        .unwrap();
    store
        .update("events", &[("id", "1".to_string())], json!({ "version": 2 }))
        .await
        .unwrap();

    let first = feed.recv().await.unwrap();
    assert_eq!(first.op, ChangeOp::Insert);
    let second = feed.recv().await.unwrap();
    assert_eq!(second.op, ChangeOp::Update);
    assert_eq!(second.row["version"], json!(2));
}

#[tokio::test]
async fn http_store_reads_with_equality_filters() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/queue_entries"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![json!({
            "id": id,
            "status": "waiting",
            "version": 1,
        })]))
        .mount(&mock_server)
        .await;

    let store = HttpStore::new(&config_for(&mock_server.uri()));
    let rows = store
        .read("queue_entries", &[("id", id.to_string())])
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], json!("waiting"));
}

#[tokio::test]
async fn http_store_update_if_restates_version_in_predicate() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/facility_counters"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("version", "eq.3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![json!({
            "id": id,
            "version": 4,
        })]))
        .mount(&mock_server)
        .await;

    let store = HttpStore::new(&config_for(&mock_server.uri()));
    let applied = store
        .update_if(
            "facility_counters",
            &[("id", id.to_string())],
            3,
            json!({ "version": 4 }),
        )
        .await
        .unwrap();

    assert!(applied);
}

#[tokio::test]
async fn http_store_update_if_treats_empty_result_as_lost_race() {
    let mock_server = MockServer::start().await;
    let id = Uuid::new_v4();

    // The row no longer carries the expected version, so the predicate
    // matches nothing and PostgREST returns an empty representation.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/facility_counters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&mock_server)
        .await;

    let store = HttpStore::new(&config_for(&mock_server.uri()));
    let applied = store
        .update_if(
            "facility_counters",
            &[("id", id.to_string())],
            3,
            json!({ "version": 4 }),
        )
        .await
        .unwrap();

    assert!(!applied);
}

#[tokio::test]
async fn http_store_surfaces_auth_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/queue_entries"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&mock_server)
        .await;

    let store = HttpStore::new(&config_for(&mock_server.uri()));
    let result = store.read("queue_entries", &[]).await;

    let message = result.unwrap_err().to_string();
    assert!(message.contains("authentication"));
}
