mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{decrypt_request, encrypted_b64, send, test_app, test_app_with_clock};
use recovery_gateway::limiter::ManualClock;
use serde_json::json;

#[tokio::test]
async fn exhausted_window_reopens_after_expiry() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let app = test_app_with_clock(1, 30, clock.clone()).await;

    let (status, body) = app
        .post_decrypt(json!({ "key_retrieval_ciphertext": encrypted_b64(r#"{"key":"one"}"#) }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ratelimit_resets_in"], 30);

    let (status, body) = app
        .post_decrypt(json!({ "key_retrieval_ciphertext": encrypted_b64(r#"{"key":"two"}"#) }))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let resets_in = body["ratelimit_resets_in"].as_i64().unwrap();
    assert_eq!(resets_in, 30);

    clock.advance(Duration::seconds(resets_in));
    let (status, body) = app
        .post_decrypt(json!({ "key_retrieval_ciphertext": encrypted_b64(r#"{"key":"three"}"#) }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key_recovered"], "three");
    assert_eq!(body["ratelimit_remaining"], 0);
    assert_eq!(body["ratelimit_resets_in"], 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_respect_allowance() {
    let app = test_app(3).await;
    let ciphertexts: Vec<String> = (0..8)
        .map(|i| encrypted_b64(&format!(r#"{{"key":"k{i}"}}"#)))
        .collect();

    let mut handles = Vec::new();
    for ciphertext in ciphertexts {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = decrypt_request(json!({ "key_retrieval_ciphertext": ciphertext }));
            send(router, request).await.0
        }));
    }

    let mut ok = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(limited, 5);
    assert_eq!(app.limiter.remaining().await, 0);
}
