/// Staff action audit trail
///
/// Entries are written on the caller's connection so they commit or roll
/// back with the action they describe.
use crate::db::parse_timestamp;
use crate::error::DeskResult;
use crate::moderation::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor_id: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub request_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What is being recorded
pub struct AuditEvent<'a> {
    pub actor_id: &'a str,
    pub action: &'a str,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<i64>,
    pub request_id: Option<i64>,
    pub details: Option<&'a str>,
}

/// Append an entry
pub async fn record(conn: &mut SqliteConnection, event: AuditEvent<'_>) -> DeskResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (actor_id, action, entity_type, entity_id, request_id, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.actor_id)
    .bind(event.action)
    .bind(event.entity_type.map(|t| t.as_str()))
    .bind(event.entity_id)
    .bind(event.request_id)
    .bind(event.details)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Read side of the audit trail
#[derive(Clone)]
pub struct AuditLog {
    db: SqlitePool,
}

impl AuditLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: i64) -> DeskResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, entity_type, entity_id, request_id, details, created_at
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let created_at: String = row.get("created_at");
            entries.push(AuditLogEntry {
                id: row.get("id"),
                actor_id: row.get("actor_id"),
                action: row.get("action"),
                entity_type: row.get("entity_type"),
                entity_id: row.get("entity_id"),
                request_id: row.get("request_id"),
                details: row.get("details"),
                created_at: parse_timestamp(&created_at)?,
            });
        }

        Ok(entries)
    }
}
