mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{encrypt, test_app};
use recovery_gateway::digest::fingerprint;
use serde_json::json;

#[tokio::test]
async fn lookup_returns_records_without_response_digest() {
    let app = test_app(10).await;
    let ciphertext = encrypt(
        r#"{"key":"abc123","client_record_id":"invoice-88","deprecate_at":"2099-01-01T00:00:00Z"}"#,
    );
    let request_sha256 = fingerprint(&ciphertext);
    for _ in 0..2 {
        let (status, _) = app
            .post_decrypt(json!({ "key_retrieval_ciphertext": STANDARD.encode(&ciphertext) }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.get(&format!("/api/v1/logs/{request_sha256}")).await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().expect("array of records");
    assert_eq!(records.len(), 2);
    assert!(records[0]["id"].as_i64().unwrap() < records[1]["id"].as_i64().unwrap());
    for record in records {
        assert_eq!(record["request_sha256"], request_sha256.as_str());
        assert_eq!(record["request_ip_address"], "198.51.100.23");
        assert_eq!(record["client_record_id"], "invoice-88");
        assert!(record["deprecate_at"].as_str().unwrap().starts_with("2099-01-01T00:00:00"));
        assert!(record.get("response_dsha256").is_none());
    }
}

#[tokio::test]
async fn lookup_of_unknown_fingerprint_is_empty() {
    let app = test_app(10).await;
    let (status, body) = app.get(&format!("/api/v1/logs/{}", "0".repeat(64))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn lookup_rejects_non_digest_paths() {
    let app = test_app(10).await;
    let (status, body) = app.get("/api/v1/logs/not-a-digest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_name"], "BadRequest");
}

#[tokio::test]
async fn lookup_store_failure_is_named() {
    let app = test_app(10).await;
    app.pool.close().await;
    let (status, body) = app.get(&format!("/api/v1/logs/{}", "a".repeat(64))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_name"], "FetchDecryptionRecordsError");
}

#[tokio::test]
async fn search_filters_by_client_record_and_user_agent() {
    let app = test_app(10).await;
    for payload in [
        r#"{"key":"a","client_record_id":"alpha"}"#,
        r#"{"key":"b","client_record_id":"beta"}"#,
        r#"{"key":"c","client_record_id":"alpha"}"#,
    ] {
        let (status, _) = app
            .post_decrypt(json!({ "key_retrieval_ciphertext": STANDARD.encode(encrypt(payload)) }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.get("/api/v1/logs?client_record_id=alpha").await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0]["id"].as_i64().unwrap() > records[1]["id"].as_i64().unwrap());

    let (_, body) = app.get("/api/v1/logs?user_agent=integration-test&limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = app.get("/api/v1/logs?ip=203.0.113.1").await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn status_reports_config_and_quota() {
    let app = test_app(10).await;
    let (status, _) = app
        .post_decrypt(json!({ "key_retrieval_ciphertext": STANDARD.encode(encrypt(r#"{"key":"k"}"#)) }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["decrypts_allowed_per_period"], 10);
    assert_eq!(body["config"]["ciphertext_bytes"], 256);
    assert_eq!(body["quota"]["limit"], 10);
    assert_eq!(body["quota"]["remaining"], 9);
    assert!(!body.to_string().contains("PRIVATE KEY"));
}

#[tokio::test]
async fn search_accepts_offsets_and_names_bad_parameters() {
    let app = test_app(10).await;
    let (status, _) = app
        .post_decrypt(json!({ "key_retrieval_ciphertext": STANDARD.encode(encrypt(r#"{"key":"k"}"#)) }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/v1/logs?start=2000-01-01T00:00:00+00:00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = app.get("/api/v1/logs?start=2000-01-01T00:00:00%2B00:00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    for uri in ["/api/v1/logs?limit=abc", "/api/v1/logs?start=yesterday"] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error_name"], "BadRequest", "{uri}");
        assert!(body["error_description"].as_str().is_some(), "{uri}");
    }
}
