use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::audit::{AuditFilter, AuditRecord};
use crate::config::ConfigSummary;
use crate::error::{AppError, AppResult};
use crate::extractor::ClientOrigin;
use crate::gateway::{DecryptRequest, Gateway};
use crate::limiter::QuotaTelemetry;

#[derive(Serialize)]
pub struct StatusReport {
    pub config: ConfigSummary,
    pub quota: QuotaTelemetry,
}

/// Decrypt and audit-lookup endpoints. Expects `Extension<Gateway>` and
/// `Extension<Arc<ConfigSummary>>` layers.
pub fn api_routes() -> Router {
    Router::new()
        .route("/", get(status))
        .route("/api/v1/decrypt", post(decrypt))
        .route("/api/v1/logs", get(search_logs))
        .route("/api/v1/logs/:request_sha256", get(logs_for_request))
}

async fn status(
    Extension(gateway): Extension<Gateway>,
    Extension(summary): Extension<Arc<ConfigSummary>>,
) -> Json<StatusReport> {
    Json(StatusReport {
        config: summary.as_ref().clone(),
        quota: gateway.limiter().telemetry().await,
    })
}

async fn decrypt(
    Extension(gateway): Extension<Gateway>,
    ClientOrigin(origin): ClientOrigin,
    request: Result<Json<DecryptRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return AppError::BadRequest(rejection.body_text()).into_response(),
    };
    gateway.recover(request, origin).await.into_response()
}

async fn logs_for_request(
    Extension(gateway): Extension<Gateway>,
    Path(request_sha256): Path<String>,
) -> AppResult<Json<Vec<AuditRecord>>> {
    let request_sha256 = request_sha256.trim().to_ascii_lowercase();
    if request_sha256.len() != 64 || !request_sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest(
            "request_sha256 must be a 64 character hex digest".into(),
        ));
    }
    let records = gateway
        .audit()
        .query_by_fingerprint(&request_sha256)
        .await
        .map_err(|e| {
            tracing::error!(?e, %request_sha256, "DB error fetching decryption records");
            AppError::Db(e)
        })?;
    Ok(Json(records))
}

async fn search_logs(
    Extension(gateway): Extension<Gateway>,
    filter: Result<Query<AuditFilter>, QueryRejection>,
) -> AppResult<Json<Vec<AuditRecord>>> {
    let Query(filter) = filter.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let records = gateway
        .audit()
        .search(filter.into_query())
        .await
        .map_err(|e| {
            tracing::error!(?e, "DB error searching decryption records");
            AppError::Db(e)
        })?;
    Ok(Json(records))
}

/// Full application router with its shared state attached.
pub fn app(gateway: Gateway, summary: ConfigSummary) -> Router {
    api_routes()
        .layer(Extension(gateway))
        .layer(Extension(Arc::new(summary)))
}
