#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use rand_core::OsRng;
use recovery_gateway::audit::{AuditStore, SqliteAuditStore};
use recovery_gateway::crypto::Decryptor;
use recovery_gateway::limiter::{Clock, RateLimitConfig, RateLimiter};
use recovery_gateway::{routes, ConfigSummary, Gateway};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use sha2::Sha256;
use sqlx::SqlitePool;
use tower::ServiceExt;

pub static KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("generate test key"));

pub fn encrypt(plaintext: &str) -> Vec<u8> {
    RsaPublicKey::from(&*KEY)
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
        .expect("encrypt payload")
}

pub fn encrypted_b64(plaintext: &str) -> String {
    STANDARD.encode(encrypt(plaintext))
}

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditStore>,
}

pub async fn test_app(allowed: u32) -> TestApp {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        allowed,
        period_seconds: 600,
    }));
    build(limiter).await
}

pub async fn test_app_with_clock(allowed: u32, period_seconds: u32, clock: Arc<dyn Clock>) -> TestApp {
    let limiter = Arc::new(RateLimiter::with_clock(
        RateLimitConfig {
            allowed,
            period_seconds,
        },
        clock,
    ));
    build(limiter).await
}

async fn build(limiter: Arc<RateLimiter>) -> TestApp {
    let pool = recovery_gateway::db::connect_in_memory()
        .await
        .expect("in-memory database");
    let audit: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(pool.clone()));
    let decryptor = Decryptor::new(KEY.clone());
    let summary = ConfigSummary {
        sqlite_path: ":memory:".into(),
        server_host: "localhost".into(),
        server_port: 0,
        decrypts_allowed_per_period: limiter.config().allowed,
        period_in_seconds: limiter.config().period_seconds,
        ciphertext_bytes: decryptor.ciphertext_len(),
    };
    let gateway = Gateway::new(Arc::new(decryptor), limiter.clone(), audit.clone());
    TestApp {
        router: routes::app(gateway, summary),
        pool,
        limiter,
        audit,
    }
}

impl TestApp {
    pub async fn post_decrypt(&self, body: Value) -> (StatusCode, Value) {
        send(self.router.clone(), decrypt_request(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.router.clone(), request).await
    }
}

pub fn decrypt_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/decrypt")
        .header("content-type", "application/json")
        .header("user-agent", "integration-test")
        .header("x-forwarded-for", "198.51.100.23")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Drives an owned router, so callers can move it into spawned tasks.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, json)
}
