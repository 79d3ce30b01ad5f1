//! Schema of the decrypted key-retrieval payload.
//!
//! The plaintext is decoded once into [`RawPayload`], whose fields record
//! whether each member was absent, present with the wrong JSON type, or
//! present and well typed. [`validate`] then walks the fields in a fixed
//! order and stops at the first violation, because clients depend on the
//! specific error name they get back.

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("decrypted payload is not a JSON object")]
    MalformedPayload,
    #[error("decrypted payload JSON lacks `key` attribute")]
    MissingKey,
    #[error("decrypted payload JSON `key` is not a string")]
    KeyNotString,
    #[error("key deprecation time is not a string")]
    DeprecationFormatInvalid,
    #[error("key deprecation time cannot be parsed as RFC3339")]
    DeprecationUnparseable,
    #[error("key to decrypt this payload is marked as deprecated")]
    KeyDeprecated,
    #[error("client_record_id must be a string")]
    ClientRecordIdInvalid,
    #[error("risk_multiplier must be an integer")]
    RiskMultiplierInvalid,
    #[error("risk_multiplier must be positive")]
    RiskMultiplierNotPositive,
}

/// Validated contents of a decrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredPayload {
    pub key: String,
    pub deprecate_at: Option<DateTime<Utc>>,
    pub client_record_id: Option<String>,
    /// `None` when the payload did not carry one; the effective weight is then 1.
    pub risk_multiplier: Option<i64>,
}

impl RecoveredPayload {
    pub fn weight(&self) -> i64 {
        self.risk_multiplier.unwrap_or(1)
    }
}

#[derive(Debug)]
enum Field<T> {
    Absent,
    Mistyped,
    Present(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).map_or(Field::Mistyped, Field::Present))
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    key: Field<String>,
    #[serde(default)]
    deprecate_at: Field<String>,
    #[serde(default)]
    client_record_id: Field<String>,
    #[serde(default)]
    risk_multiplier: Field<Number>,
}

pub fn validate(plaintext: &[u8], now: DateTime<Utc>) -> Result<RecoveredPayload, ValidationError> {
    let object: Map<String, Value> =
        serde_json::from_slice(plaintext).map_err(|_| ValidationError::MalformedPayload)?;
    let raw = RawPayload::deserialize(Value::Object(object))
        .map_err(|_| ValidationError::MalformedPayload)?;

    let key = match raw.key {
        Field::Absent => return Err(ValidationError::MissingKey),
        Field::Mistyped => return Err(ValidationError::KeyNotString),
        Field::Present(key) => key,
    };

    let deprecate_at = match raw.deprecate_at {
        Field::Absent => None,
        Field::Mistyped => return Err(ValidationError::DeprecationFormatInvalid),
        Field::Present(text) => {
            let at = DateTime::parse_from_rfc3339(&text)
                .map_err(|_| ValidationError::DeprecationUnparseable)?
                .with_timezone(&Utc);
            if at <= now {
                return Err(ValidationError::KeyDeprecated);
            }
            Some(at)
        }
    };

    let client_record_id = match raw.client_record_id {
        Field::Absent => None,
        Field::Mistyped => return Err(ValidationError::ClientRecordIdInvalid),
        Field::Present(id) => Some(id),
    };

    let risk_multiplier = match raw.risk_multiplier {
        Field::Absent => None,
        Field::Mistyped => return Err(ValidationError::RiskMultiplierInvalid),
        Field::Present(number) => {
            let value = integral(&number).ok_or(ValidationError::RiskMultiplierInvalid)?;
            if value < 1 {
                return Err(ValidationError::RiskMultiplierNotPositive);
            }
            Some(value)
        }
    };

    Ok(RecoveredPayload {
        key,
        deprecate_at,
        client_record_id,
        risk_multiplier,
    })
}

// Accepts 3 and 3.0, rejects 2.5 and anything outside i64.
fn integral(number: &Number) -> Option<i64> {
    if let Some(value) = number.as_i64() {
        return Some(value);
    }
    let value = number.as_f64()?;
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}
