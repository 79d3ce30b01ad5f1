use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};

/// One completed decryption, as persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub request_sha256: String,
    pub request_ip_address: String,
    pub request_user_agent: String,
    /// Derived from the plaintext; a leak would allow brute-forcing weak payloads.
    #[serde(skip_serializing)]
    pub response_dsha256: String,
    pub client_record_id: Option<String>,
    pub deprecate_at: Option<DateTime<Utc>>,
    pub risk_multiplier: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub request_sha256: String,
    pub request_ip_address: String,
    pub request_user_agent: String,
    pub response_dsha256: String,
    pub client_record_id: Option<String>,
    pub deprecate_at: Option<DateTime<Utc>>,
    pub risk_multiplier: Option<i64>,
}

/// Optional predicates over the indexed columns; unset fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub request_sha256: Option<String>,
    pub request_ip_address: Option<String>,
    pub request_user_agent: Option<String>,
    pub client_record_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

const COLUMNS: &str = "id, created_at, request_sha256, request_ip_address, request_user_agent, \
     response_dsha256, client_record_id, deprecate_at, risk_multiplier";

pub async fn insert_record(
    pool: &SqlitePool,
    input: NewAuditRecord,
) -> Result<AuditRecord, sqlx::Error> {
    let created_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO decrypt_audit_log (
            created_at,
            request_sha256,
            request_ip_address,
            request_user_agent,
            response_dsha256,
            client_record_id,
            deprecate_at,
            risk_multiplier
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(created_at)
    .bind(&input.request_sha256)
    .bind(&input.request_ip_address)
    .bind(&input.request_user_agent)
    .bind(&input.response_dsha256)
    .bind(&input.client_record_id)
    .bind(input.deprecate_at)
    .bind(input.risk_multiplier)
    .execute(pool)
    .await?;

    Ok(AuditRecord {
        id: result.last_insert_rowid(),
        created_at,
        request_sha256: input.request_sha256,
        request_ip_address: input.request_ip_address,
        request_user_agent: input.request_user_agent,
        response_dsha256: input.response_dsha256,
        client_record_id: input.client_record_id,
        deprecate_at: input.deprecate_at,
        risk_multiplier: input.risk_multiplier,
    })
}

pub async fn list_for_request(
    pool: &SqlitePool,
    request_sha256: &str,
) -> Result<Vec<AuditRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM decrypt_audit_log WHERE request_sha256 = ? ORDER BY id ASC"
    ))
    .bind(request_sha256)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_row).collect()
}

/// Newest first.
pub async fn search(pool: &SqlitePool, query: &AuditQuery) -> Result<Vec<AuditRecord>, sqlx::Error> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM decrypt_audit_log WHERE 1 = 1"));

    if let Some(request_sha256) = &query.request_sha256 {
        builder.push(" AND request_sha256 = ");
        builder.push_bind(request_sha256.clone());
    }
    if let Some(ip) = &query.request_ip_address {
        builder.push(" AND request_ip_address = ");
        builder.push_bind(ip.clone());
    }
    if let Some(user_agent) = &query.request_user_agent {
        builder.push(" AND request_user_agent = ");
        builder.push_bind(user_agent.clone());
    }
    if let Some(client_record_id) = &query.client_record_id {
        builder.push(" AND client_record_id = ");
        builder.push_bind(client_record_id.clone());
    }
    if let Some(start) = query.start {
        builder.push(" AND created_at >= ");
        builder.push_bind(start);
    }
    if let Some(end) = query.end {
        builder.push(" AND created_at <= ");
        builder.push_bind(end);
    }

    builder.push(" ORDER BY id DESC");

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter().map(map_row).collect()
}

fn map_row(row: &SqliteRow) -> Result<AuditRecord, sqlx::Error> {
    Ok(AuditRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        request_sha256: row.try_get("request_sha256")?,
        request_ip_address: row.try_get("request_ip_address")?,
        request_user_agent: row.try_get("request_user_agent")?,
        response_dsha256: row.try_get("response_dsha256")?,
        client_record_id: row.try_get("client_record_id")?,
        deprecate_at: row.try_get("deprecate_at")?,
        risk_multiplier: row.try_get("risk_multiplier")?,
    })
}
