//! Decrypt-request pipeline.
//!
//! ```text
//! base64 -> length check -> fingerprint -> admit(1) -> decrypt -> validate
//!        -> admit(weight - 1) -> audit append -> accepted
//! ```
//!
//! Each step short-circuits. A quota rejection produces the rejected
//! response shape and is never audited; every other failure is a
//! [`GatewayError`] carrying the machine-readable name clients match on.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditStore, NewAuditRecord};
use crate::crypto::{trim_trailing_whitespace, Decryptor};
use crate::digest::{double_fingerprint, fingerprint};
use crate::limiter::{QuotaTelemetry, RateLimiter};
use crate::payload::{self, ValidationError};

#[derive(Debug, Clone, Deserialize)]
pub struct DecryptRequest {
    pub key_retrieval_ciphertext: String,
    /// Forces the rejected path without touching the quota.
    #[serde(default)]
    pub over_limit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub key_recovered: String,
    pub request_sha256: String,
    pub ratelimit_limit: u32,
    pub ratelimit_remaining: u32,
    pub ratelimit_resets_in: i64,
}

/// Who sent the request, as recorded in the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    Accepted(DecryptResponse),
    Rejected(DecryptResponse),
}

impl IntoResponse for DecryptOutcome {
    fn into_response(self) -> Response {
        match self {
            DecryptOutcome::Accepted(body) => (StatusCode::OK, Json(body)).into_response(),
            DecryptOutcome::Rejected(body) => {
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("cannot base64 decode key_retrieval_ciphertext")]
    Base64Decode,
    #[error("base64 decoded key_retrieval_ciphertext is not {expected} bytes")]
    InvalidCiphertextLength { expected: usize },
    #[error("unable to decrypt key_retrieval_ciphertext")]
    DecryptionFailure,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("error logging decryption request")]
    DecryptionLogging,
}

impl GatewayError {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayError::Base64Decode => "B64Decode",
            GatewayError::InvalidCiphertextLength { .. } => "InvalidLengthCiphertext",
            GatewayError::DecryptionFailure => "DecryptionFail",
            GatewayError::Validation(error) => match error {
                ValidationError::MalformedPayload => "InvalidJSONError",
                ValidationError::MissingKey => "JSONMissingKeyError",
                ValidationError::KeyNotString => "JSONKeyStringError",
                ValidationError::DeprecationFormatInvalid => "DeprecatedAtFormatError",
                ValidationError::DeprecationUnparseable => "InvalidTimeError",
                ValidationError::KeyDeprecated => "DeprecatedDecryptionKeyError",
                ValidationError::ClientRecordIdInvalid => "ClientRecordIDFormatError",
                ValidationError::RiskMultiplierInvalid => "RiskMultiplierFormatError",
                ValidationError::RiskMultiplierNotPositive => "RiskMultiplierNotPositive",
            },
            GatewayError::DecryptionLogging => "DecryptionLoggingError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::DecryptionLogging => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error_name: String,
    pub error_description: String,
}

impl ApiErrorBody {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error_name: name.into(),
            error_description: description.into(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody::new(self.name(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct Gateway {
    decryptor: Arc<Decryptor>,
    limiter: Arc<RateLimiter>,
    audit: Arc<dyn AuditStore>,
}

impl Gateway {
    pub fn new(
        decryptor: Arc<Decryptor>,
        limiter: Arc<RateLimiter>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            decryptor,
            limiter,
            audit,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    pub async fn recover(
        &self,
        request: DecryptRequest,
        origin: RequestOrigin,
    ) -> Result<DecryptOutcome, GatewayError> {
        let ciphertext = STANDARD
            .decode(request.key_retrieval_ciphertext.trim())
            .map_err(|_| GatewayError::Base64Decode)
            .map_err(log_failure)?;
        let expected = self.decryptor.ciphertext_len();
        if ciphertext.len() != expected {
            return Err(log_failure(GatewayError::InvalidCiphertextLength { expected }));
        }

        let request_sha256 = fingerprint(&ciphertext);

        if request.over_limit || !self.limiter.try_admit(1).await {
            tracing::warn!(%request_sha256, forced = request.over_limit, "decrypt quota exhausted");
            let telemetry = self.limiter.telemetry().await;
            return Ok(DecryptOutcome::Rejected(DecryptResponse {
                ratelimit_remaining: 0,
                ..response(String::new(), request_sha256, telemetry)
            }));
        }

        let decrypted = self
            .decryptor
            .decrypt(&ciphertext)
            .map_err(|_| log_failure(GatewayError::DecryptionFailure))?;
        let plaintext = trim_trailing_whitespace(&decrypted);

        let recovered = payload::validate(plaintext, Utc::now())
            .map_err(|error| log_failure(GatewayError::from(error)))?;

        let weight = recovered.weight();
        if weight > 1 {
            let extra = u32::try_from(weight - 1).unwrap_or(u32::MAX);
            // The unit charged above stays spent even if this charge fails.
            if !self.limiter.try_admit(extra).await {
                tracing::warn!(%request_sha256, weight, "weighted decrypt exceeds remaining quota");
                let telemetry = self.limiter.telemetry().await;
                return Ok(DecryptOutcome::Rejected(response(
                    String::new(),
                    request_sha256,
                    telemetry,
                )));
            }
        }

        let record = NewAuditRecord {
            request_sha256: request_sha256.clone(),
            request_ip_address: origin.ip_address,
            request_user_agent: origin.user_agent,
            response_dsha256: double_fingerprint(plaintext),
            client_record_id: recovered.client_record_id,
            deprecate_at: recovered.deprecate_at,
            risk_multiplier: recovered.risk_multiplier,
        };
        let stored = self.audit.append(record).await.map_err(|error| {
            tracing::error!(?error, %request_sha256, "failed to record decryption");
            GatewayError::DecryptionLogging
        })?;
        tracing::info!(audit_id = stored.id, %request_sha256, weight, "key recovered");

        let telemetry = self.limiter.telemetry().await;
        Ok(DecryptOutcome::Accepted(response(
            recovered.key,
            request_sha256,
            telemetry,
        )))
    }
}

fn response(key_recovered: String, request_sha256: String, telemetry: QuotaTelemetry) -> DecryptResponse {
    DecryptResponse {
        key_recovered,
        request_sha256,
        ratelimit_limit: telemetry.limit,
        ratelimit_remaining: telemetry.remaining,
        ratelimit_resets_in: telemetry.resets_in,
    }
}

fn log_failure(error: GatewayError) -> GatewayError {
    tracing::warn!(error_name = error.name(), "decrypt request refused");
    error
}
