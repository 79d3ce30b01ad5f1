use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer};
use sqlx::SqlitePool;

pub use crate::db::decrypt_audit_log::{AuditQuery, AuditRecord, NewAuditRecord};
use crate::db::decrypt_audit_log;

pub const DEFAULT_SEARCH_LIMIT: i64 = 100;
pub const MAX_SEARCH_LIMIT: i64 = 1000;

/// Append-only log of completed decryptions.
///
/// Implementations must surface every failed append; the gateway withholds
/// the recovered key whenever a write does not land.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: NewAuditRecord) -> sqlx::Result<AuditRecord>;
    /// Every attempt for one ciphertext, oldest first.
    async fn query_by_fingerprint(&self, request_sha256: &str) -> sqlx::Result<Vec<AuditRecord>>;
    async fn search(&self, query: AuditQuery) -> sqlx::Result<Vec<AuditRecord>>;
}

#[derive(Clone, Debug)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: NewAuditRecord) -> sqlx::Result<AuditRecord> {
        decrypt_audit_log::insert_record(&self.pool, record).await
    }

    async fn query_by_fingerprint(&self, request_sha256: &str) -> sqlx::Result<Vec<AuditRecord>> {
        decrypt_audit_log::list_for_request(&self.pool, request_sha256).await
    }

    async fn search(&self, query: AuditQuery) -> sqlx::Result<Vec<AuditRecord>> {
        decrypt_audit_log::search(&self.pool, &query).await
    }
}

/// Query-string envelope for investigative lookups over the indexed columns.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuditFilter {
    pub request_sha256: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub client_record_id: Option<String>,
    #[serde(default, deserialize_with = "query_timestamp")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "query_timestamp")]
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuditFilter {
    /// Blank strings count as unset and the limit is clamped to `1..=MAX_SEARCH_LIMIT`.
    pub fn into_query(self) -> AuditQuery {
        AuditQuery {
            request_sha256: non_empty(self.request_sha256),
            request_ip_address: non_empty(self.ip),
            request_user_agent: non_empty(self.user_agent),
            client_record_id: non_empty(self.client_record_id),
            start: self.start,
            end: self.end,
            limit: Some(
                self.limit
                    .unwrap_or(DEFAULT_SEARCH_LIMIT)
                    .clamp(1, MAX_SEARCH_LIMIT),
            ),
        }
    }
}

/// RFC 3339 from a query string. An unescaped `+` offset arrives as a space.
fn query_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(&raw.replace(' ', "+")))
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|_| D::Error::custom(format!("`{raw}` is not an RFC 3339 timestamp")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
