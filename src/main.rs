use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use recovery_gateway::audit::{AuditStore, SqliteAuditStore};
use recovery_gateway::limiter::RateLimiter;
use recovery_gateway::{db, routes, Gateway, GatewayConfig};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Refuse to serve without a usable key and limits.
    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    let summary = config.summary();
    tracing::info!(?summary, "configuration loaded");

    let pool = db::connect(&config.sqlite_path)
        .await
        .with_context(|| format!("failed to open audit database {}", config.sqlite_path))?;
    let audit: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(pool));

    let addr = config.bind_address()?;
    let gateway = Gateway::new(
        Arc::new(config.decryptor),
        Arc::new(RateLimiter::new(config.rate_limit)),
        audit,
    );

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = routes::app(gateway, summary)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}
