/// Moderation request persistence
///
/// Pool-backed reads live on [`RequestRepository`]; the write helpers take a
/// connection so intake and resolution can compose them inside one
/// transaction.
use super::{ActionType, EntityType, ModerationRequest, RequestStatus, Snapshot};
use crate::db::{parse_optional_timestamp, parse_timestamp};
use crate::error::{map_pending_conflict, DeskError, DeskResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    SELECT id, entity_type, action_type, entity_id, old_content, new_content,
           status, student_id, reviewer_id, rejection_reason, created_at, resolved_at
    FROM moderation_requests
"#;

/// Read access to moderation requests
#[derive(Clone)]
pub struct RequestRepository {
    db: SqlitePool,
}

impl RequestRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get a request by id
    pub async fn get(&self, id: i64) -> DeskResult<ModerationRequest> {
        let mut conn = self.db.acquire().await?;
        fetch(&mut conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Moderation request {} not found", id)))
    }

    /// List requests, oldest first, optionally filtered by status
    pub async fn list(&self, status: Option<RequestStatus>) -> DeskResult<Vec<ModerationRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "{} WHERE status = ? ORDER BY created_at ASC, id ASC",
                    SELECT_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY created_at ASC, id ASC", SELECT_COLUMNS))
                    .fetch_all(&self.db)
                    .await?
            }
        };

        rows.iter().map(parse_request).collect()
    }

    /// List a student's own requests, newest first
    pub async fn list_for_student(&self, student_id: &str) -> DeskResult<Vec<ModerationRequest>> {
        let rows = sqlx::query(&format!(
            "{} WHERE student_id = ? ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_request).collect()
    }

    /// Count pending requests
    pub async fn pending_count(&self) -> DeskResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM moderation_requests WHERE status = 'pending'")
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}

/// Fields of a new request
pub(crate) struct NewRequest<'a> {
    pub entity_type: EntityType,
    pub action_type: ActionType,
    pub entity_id: Option<i64>,
    pub old_content: Option<Snapshot>,
    pub new_content: Option<Snapshot>,
    pub student_id: &'a str,
}

/// Terminal outcome written by the resolver
pub(crate) struct Resolution<'a> {
    pub status: RequestStatus,
    pub reviewer_id: &'a str,
    pub rejection_reason: Option<&'a str>,
    pub resolved_at: DateTime<Utc>,
}

/// Insert a pending request
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    new: NewRequest<'_>,
) -> DeskResult<ModerationRequest> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO moderation_requests
        (entity_type, action_type, entity_id, old_content, new_content, status, student_id, created_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(new.entity_type.as_str())
    .bind(new.action_type.as_str())
    .bind(new.entity_id)
    .bind(encode_snapshot(new.old_content.as_ref())?)
    .bind(encode_snapshot(new.new_content.as_ref())?)
    .bind(new.student_id)
    .bind(now.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(|e| match new.entity_id {
        Some(entity_id) => map_pending_conflict(e, new.entity_type.as_str(), entity_id),
        None => DeskError::Database(e),
    })?;

    Ok(ModerationRequest {
        id: result.last_insert_rowid(),
        entity_type: new.entity_type,
        action_type: new.action_type,
        entity_id: new.entity_id,
        old_content: new.old_content,
        new_content: new.new_content,
        status: RequestStatus::Pending,
        student_id: new.student_id.to_string(),
        reviewer_id: None,
        rejection_reason: None,
        created_at: now,
        resolved_at: None,
    })
}

/// Load a request on an existing connection
pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    id: i64,
) -> DeskResult<Option<ModerationRequest>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_request).transpose()
}

/// Whether a pending request already targets the entity
pub(crate) async fn has_pending(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: i64,
) -> DeskResult<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM moderation_requests
        WHERE entity_type = ? AND entity_id = ? AND status = 'pending'
        "#,
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

/// Move a request out of `pending`; false when another resolution won
pub(crate) async fn compare_and_resolve(
    conn: &mut SqliteConnection,
    id: i64,
    resolution: &Resolution<'_>,
) -> DeskResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE moderation_requests
        SET status = ?,
            reviewer_id = ?,
            rejection_reason = ?,
            resolved_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(resolution.status.as_str())
    .bind(resolution.reviewer_id)
    .bind(resolution.rejection_reason)
    .bind(resolution.resolved_at.to_rfc3339())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the entity a create request published
pub(crate) async fn assign_entity(
    conn: &mut SqliteConnection,
    id: i64,
    entity_id: i64,
) -> DeskResult<()> {
    sqlx::query("UPDATE moderation_requests SET entity_id = ? WHERE id = ?")
        .bind(entity_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Reject whatever is pending against an entity that is going away
pub(crate) async fn reject_pending_for_entity(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: i64,
    reviewer_id: &str,
    reason: &str,
) -> DeskResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE moderation_requests
        SET status = 'rejected',
            reviewer_id = ?,
            rejection_reason = ?,
            resolved_at = ?
        WHERE entity_type = ? AND entity_id = ? AND status = 'pending'
        "#,
    )
    .bind(reviewer_id)
    .bind(reason)
    .bind(Utc::now().to_rfc3339())
    .bind(entity_type.as_str())
    .bind(entity_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn encode_snapshot(snapshot: Option<&Snapshot>) -> DeskResult<Option<String>> {
    snapshot
        .map(|s| {
            serde_json::to_string(s)
                .map_err(|e| DeskError::Internal(format!("Failed to encode snapshot: {}", e)))
        })
        .transpose()
}

fn decode_snapshot(raw: Option<String>) -> DeskResult<Option<Snapshot>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| DeskError::Internal(format!("Corrupt snapshot: {}", e)))
    })
    .transpose()
}

fn parse_request(row: &SqliteRow) -> DeskResult<ModerationRequest> {
    let entity_type: String = row.get("entity_type");
    let action_type: String = row.get("action_type");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(ModerationRequest {
        id: row.get("id"),
        entity_type: EntityType::from_str(&entity_type)?,
        action_type: ActionType::from_str(&action_type)?,
        entity_id: row.get("entity_id"),
        old_content: decode_snapshot(row.get("old_content"))?,
        new_content: decode_snapshot(row.get("new_content"))?,
        status: RequestStatus::from_str(&status)?,
        student_id: row.get("student_id"),
        reviewer_id: row.get("reviewer_id"),
        rejection_reason: row.get("rejection_reason"),
        created_at: parse_timestamp(&created_at)?,
        resolved_at: parse_optional_timestamp(row.get("resolved_at"))?,
    })
}
