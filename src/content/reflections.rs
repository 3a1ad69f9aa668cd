/// Student reflections
///
/// A create request stages a `pending` draft row so the owning student can
/// see what they wrote; staff and parents only ever see published rows
/// (`approved` or `pending_deletion`). A delete request flags the row
/// `pending_deletion` until it is resolved.
use super::topics::require_active;
use super::{
    int_field, merge_optional_text, text_field, ContentKind, EntityRecord, FieldKind, FieldSpec,
};
use crate::audit::{self, AuditEvent};
use crate::db::{begin_immediate, parse_timestamp};
use crate::error::{DeskError, DeskResult};
use crate::moderation::requests::{self, Resolution};
use crate::moderation::{ActionType, EntityType, ModerationRequest, RequestStatus, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

/// Reason stored on requests closed by a direct staff delete
pub const REMOVED_BY_STAFF: &str = "Reflection removed by staff";

const SELECT_COLUMNS: &str = r#"
    SELECT id, topic_id, student_id, content, attachment_url, status, week, created_at, updated_at
    FROM reflections
"#;

const PUBLISHED: &str = "status IN ('approved', 'pending_deletion')";

const REFLECTION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("topic_id", FieldKind::Integer, true),
    FieldSpec::new("content", FieldKind::Text, true),
    FieldSpec::new("attachment_url", FieldKind::OptionalText, false),
    FieldSpec::new("week", FieldKind::Text, false),
];

/// Moderation state of a reflection row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionStatus {
    Pending,
    Approved,
    Rejected,
    PendingDeletion,
}

impl ReflectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflectionStatus::Pending => "pending",
            ReflectionStatus::Approved => "approved",
            ReflectionStatus::Rejected => "rejected",
            ReflectionStatus::PendingDeletion => "pending_deletion",
        }
    }

    pub fn from_str(s: &str) -> DeskResult<Self> {
        match s {
            "pending" => Ok(ReflectionStatus::Pending),
            "approved" => Ok(ReflectionStatus::Approved),
            "rejected" => Ok(ReflectionStatus::Rejected),
            "pending_deletion" => Ok(ReflectionStatus::PendingDeletion),
            _ => Err(DeskError::Internal(format!("Invalid reflection status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub id: i64,
    pub topic_id: i64,
    pub student_id: String,
    pub content: String,
    pub attachment_url: Option<String>,
    pub status: ReflectionStatus,
    pub week: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reflection {
    pub fn is_published(&self) -> bool {
        matches!(
            self.status,
            ReflectionStatus::Approved | ReflectionStatus::PendingDeletion
        )
    }

    fn snapshot(&self) -> Snapshot {
        let value = json!({
            "topic_id": self.topic_id,
            "content": self.content,
            "attachment_url": self.attachment_url,
            "week": self.week,
            "status": self.status.as_str(),
        });
        match value {
            Value::Object(map) => map,
            _ => Snapshot::new(),
        }
    }
}

/// Label of the school week a date falls in
pub fn week_label(date: DateTime<Utc>) -> String {
    format!("Week {}", date.iso_week().week())
}

/// Query surface and direct staff delete
#[derive(Clone)]
pub struct ReflectionStore {
    db: SqlitePool,
}

impl ReflectionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get any reflection row by id
    pub async fn fetch(&self, id: i64) -> DeskResult<Reflection> {
        let mut conn = self.db.acquire().await?;
        load_row(&mut conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Reflection {} not found", id)))
    }

    /// Published reflections of one student, newest first
    pub async fn fetch_by_student(&self, student_id: &str) -> DeskResult<Vec<Reflection>> {
        let rows = sqlx::query(&format!(
            "{} WHERE student_id = ? AND {} ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS, PUBLISHED
        ))
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_reflection).collect()
    }

    /// Every published reflection, newest first
    pub async fn fetch_all(&self) -> DeskResult<Vec<Reflection>> {
        let rows = sqlx::query(&format!(
            "{} WHERE {} ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS, PUBLISHED
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_reflection).collect()
    }

    /// Everything a student has written, including drafts awaiting review
    pub async fn fetch_mine(&self, student_id: &str) -> DeskResult<Vec<Reflection>> {
        let rows = sqlx::query(&format!(
            "{} WHERE student_id = ? ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_reflection).collect()
    }

    /// Remove a reflection without moderation
    ///
    /// Pending requests against the reflection are rejected in the same
    /// transaction, so none of them can later be approved against a missing
    /// row.
    pub async fn delete_direct(&self, id: i64, staff_id: &str) -> DeskResult<()> {
        let mut tx = begin_immediate(&self.db).await?;

        let draft_request: Option<Option<i64>> =
            sqlx::query_scalar("SELECT request_id FROM reflections WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let draft_request =
            draft_request.ok_or_else(|| DeskError::NotFound(format!("Reflection {} not found", id)))?;

        let mut closed =
            requests::reject_pending_for_entity(&mut tx, EntityType::Reflection, id, staff_id, REMOVED_BY_STAFF)
                .await?;

        if let Some(request_id) = draft_request {
            let resolution = Resolution {
                status: RequestStatus::Rejected,
                reviewer_id: staff_id,
                rejection_reason: Some(REMOVED_BY_STAFF),
                resolved_at: Utc::now(),
            };
            if requests::compare_and_resolve(&mut tx, request_id, &resolution).await? {
                closed += 1;
            }
        }

        sqlx::query("DELETE FROM reflections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        audit::record(
            &mut tx,
            AuditEvent {
                actor_id: staff_id,
                action: "reflection.delete",
                entity_type: Some(EntityType::Reflection),
                entity_id: Some(id),
                request_id: None,
                details: None,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            "Reflection {} deleted by {} ({} pending request(s) closed)",
            id, staff_id, closed
        );
        Ok(())
    }
}

/// Moderation behaviour for the `reflection` tag
pub struct ReflectionKind;

#[async_trait]
impl ContentKind for ReflectionKind {
    fn entity_type(&self) -> EntityType {
        EntityType::Reflection
    }

    fn fields(&self) -> &'static [FieldSpec] {
        REFLECTION_FIELDS
    }

    async fn prepare(
        &self,
        conn: &mut SqliteConnection,
        action: ActionType,
        content: &mut Snapshot,
    ) -> DeskResult<()> {
        if let Some(topic_id) = int_field(content, "topic_id") {
            require_active(conn, topic_id).await?;
        }

        if action == ActionType::Create && !content.contains_key("week") {
            content.insert("week".to_string(), Value::String(week_label(Utc::now())));
        }

        Ok(())
    }

    async fn load(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<EntityRecord>> {
        Ok(load_row(conn, id).await?.map(|r| EntityRecord {
            id: r.id,
            owner_id: r.student_id.clone(),
            snapshot: r.snapshot(),
        }))
    }

    fn check_mutable(&self, record: &EntityRecord) -> DeskResult<()> {
        match record.snapshot.get("status").and_then(Value::as_str) {
            Some("approved") => Ok(()),
            _ => Err(DeskError::Validation(format!(
                "Reflection {} is not published",
                record.id
            ))),
        }
    }

    async fn stage(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<()> {
        match request.action_type {
            ActionType::Create => {
                let content = request_content(request)?;
                let now = Utc::now().to_rfc3339();

                sqlx::query(
                    r#"
                    INSERT INTO reflections
                    (topic_id, student_id, content, attachment_url, status, week, request_id, created_at, updated_at)
                    VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?)
                    "#,
                )
                .bind(required_int(content, "topic_id")?)
                .bind(&request.student_id)
                .bind(required_text(content, "content")?)
                .bind(text_field(content, "attachment_url"))
                .bind(text_field(content, "week").unwrap_or_else(|| week_label(Utc::now())))
                .bind(request.id)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await?;
            }
            ActionType::Delete => {
                let id = request_entity(request)?;
                sqlx::query(
                    "UPDATE reflections SET status = 'pending_deletion', updated_at = ? WHERE id = ?",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            ActionType::Update => {}
        }

        Ok(())
    }

    async fn unstage(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<()> {
        match request.action_type {
            ActionType::Create => {
                sqlx::query(
                    r#"
                    UPDATE reflections SET status = 'rejected', updated_at = ?
                    WHERE request_id = ? AND status = 'pending'
                    "#,
                )
                .bind(Utc::now().to_rfc3339())
                .bind(request.id)
                .execute(&mut *conn)
                .await?;
            }
            ActionType::Delete => {
                let id = request_entity(request)?;
                let prior = request
                    .old_content
                    .as_ref()
                    .and_then(|s| s.get("status"))
                    .and_then(Value::as_str)
                    .map(ReflectionStatus::from_str)
                    .transpose()?
                    .unwrap_or(ReflectionStatus::Approved);

                sqlx::query(
                    r#"
                    UPDATE reflections SET status = ?, updated_at = ?
                    WHERE id = ? AND status = 'pending_deletion'
                    "#,
                )
                .bind(prior.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            ActionType::Update => {}
        }

        Ok(())
    }

    async fn publish(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<i64> {
        let content = request_content(request)?;
        let now = Utc::now().to_rfc3339();
        let topic_id = required_int(content, "topic_id")?;
        let body = required_text(content, "content")?;
        let attachment_url = text_field(content, "attachment_url");
        let week = text_field(content, "week").unwrap_or_else(|| week_label(Utc::now()));

        let draft: Option<i64> = sqlx::query_scalar("SELECT id FROM reflections WHERE request_id = ?")
            .bind(request.id)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(id) = draft {
            sqlx::query(
                r#"
                UPDATE reflections
                SET topic_id = ?, content = ?, attachment_url = ?, week = ?,
                    status = 'approved', updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(topic_id)
            .bind(&body)
            .bind(&attachment_url)
            .bind(&week)
            .bind(&now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            return Ok(id);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO reflections
            (topic_id, student_id, content, attachment_url, status, week, request_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'approved', ?, ?, ?, ?)
            "#,
        )
        .bind(topic_id)
        .bind(&request.student_id)
        .bind(&body)
        .bind(&attachment_url)
        .bind(&week)
        .bind(request.id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn replace(&self, conn: &mut SqliteConnection, id: i64, content: &Snapshot) -> DeskResult<()> {
        let current = load_row(conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Reflection {} not found", id)))?;

        sqlx::query(
            r#"
            UPDATE reflections
            SET topic_id = ?, content = ?, attachment_url = ?, week = ?,
                status = 'approved', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(int_field(content, "topic_id").unwrap_or(current.topic_id))
        .bind(text_field(content, "content").unwrap_or(current.content))
        .bind(merge_optional_text(content, "attachment_url", current.attachment_url))
        .bind(text_field(content, "week").unwrap_or(current.week))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn remove(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        let result = sqlx::query("DELETE FROM reflections WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Reflection {} not found", id)));
        }
        Ok(())
    }
}

fn request_content(request: &ModerationRequest) -> DeskResult<&Snapshot> {
    request.new_content.as_ref().ok_or_else(|| {
        DeskError::Internal(format!("Request {} carries no new content", request.id))
    })
}

fn request_entity(request: &ModerationRequest) -> DeskResult<i64> {
    request
        .entity_id
        .ok_or_else(|| DeskError::Internal(format!("Request {} has no entity id", request.id)))
}

fn required_int(content: &Snapshot, name: &str) -> DeskResult<i64> {
    int_field(content, name)
        .ok_or_else(|| DeskError::Validation(format!("Required field '{}' is missing", name)))
}

fn required_text(content: &Snapshot, name: &str) -> DeskResult<String> {
    text_field(content, name)
        .ok_or_else(|| DeskError::Validation(format!("Required field '{}' is missing", name)))
}

async fn load_row(conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<Reflection>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_reflection).transpose()
}

fn parse_reflection(row: &SqliteRow) -> DeskResult<Reflection> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Reflection {
        id: row.get("id"),
        topic_id: row.get("topic_id"),
        student_id: row.get("student_id"),
        content: row.get("content"),
        attachment_url: row.get("attachment_url"),
        status: ReflectionStatus::from_str(&status)?,
        week: row.get("week"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::TopicStore;
    use crate::db::create_memory_pool;
    use crate::moderation::requests::{insert, NewRequest};
    use chrono::TimeZone;

    async fn setup() -> (SqlitePool, i64) {
        let pool = create_memory_pool().await.unwrap();
        let topic = TopicStore::new(pool.clone())
            .create("What I Learned Today", None)
            .await
            .unwrap();
        (pool, topic.id)
    }

    fn content(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    async fn staged_create(pool: &SqlitePool, topic_id: i64, text: &str) -> ModerationRequest {
        let mut conn = pool.acquire().await.unwrap();
        let request = insert(
            &mut conn,
            NewRequest {
                entity_type: EntityType::Reflection,
                action_type: ActionType::Create,
                entity_id: None,
                old_content: None,
                new_content: Some(content(json!({"topic_id": topic_id, "content": text}))),
                student_id: "student-1",
            },
        )
        .await
        .unwrap();
        ReflectionKind.stage(&mut conn, &request).await.unwrap();
        request
    }

    #[test]
    fn test_week_label() {
        let date = Utc.with_ymd_and_hms(2024, 9, 4, 9, 0, 0).unwrap();
        assert_eq!(week_label(date), "Week 36");
    }

    #[tokio::test]
    async fn test_draft_visible_only_to_owner() {
        let (pool, topic_id) = setup().await;
        let store = ReflectionStore::new(pool.clone());

        staged_create(&pool, topic_id, "Butterflies").await;

        let mine = store.fetch_mine("student-1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, ReflectionStatus::Pending);
        assert!(store.fetch_all().await.unwrap().is_empty());
        assert!(store.fetch_by_student("student-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_promotes_draft() {
        let (pool, topic_id) = setup().await;
        let store = ReflectionStore::new(pool.clone());

        let request = staged_create(&pool, topic_id, "Butterflies").await;
        let mut conn = pool.acquire().await.unwrap();
        let id = ReflectionKind.publish(&mut conn, &request).await.unwrap();
        drop(conn);

        let published = store.fetch(id).await.unwrap();
        assert_eq!(published.status, ReflectionStatus::Approved);
        assert_eq!(published.content, "Butterflies");
        assert_eq!(store.fetch_mine("student-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unstage_create_marks_draft_rejected() {
        let (pool, topic_id) = setup().await;
        let store = ReflectionStore::new(pool.clone());

        let request = staged_create(&pool, topic_id, "Too short").await;
        let mut conn = pool.acquire().await.unwrap();
        ReflectionKind.unstage(&mut conn, &request).await.unwrap();
        drop(conn);

        let mine = store.fetch_mine("student-1").await.unwrap();
        assert_eq!(mine[0].status, ReflectionStatus::Rejected);
        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_fills_week_and_checks_topic() {
        let (pool, topic_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let mut proposed = content(json!({"topic_id": topic_id, "content": "Hi"}));
        ReflectionKind
            .prepare(&mut conn, ActionType::Create, &mut proposed)
            .await
            .unwrap();
        assert!(proposed["week"].as_str().unwrap().starts_with("Week "));

        let mut unknown_topic = content(json!({"topic_id": 999, "content": "Hi"}));
        assert!(matches!(
            ReflectionKind
                .prepare(&mut conn, ActionType::Create, &mut unknown_topic)
                .await,
            Err(DeskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_direct_closes_pending_draft() {
        let (pool, topic_id) = setup().await;
        let store = ReflectionStore::new(pool.clone());
        let repo = requests::RequestRepository::new(pool.clone());

        let request = staged_create(&pool, topic_id, "Draft").await;
        let draft = store.fetch_mine("student-1").await.unwrap().remove(0);

        store.delete_direct(draft.id, "staff-1").await.unwrap();

        assert!(matches!(store.fetch(draft.id).await, Err(DeskError::NotFound(_))));
        let closed = repo.get(request.id).await.unwrap();
        assert_eq!(closed.status, RequestStatus::Rejected);
        assert_eq!(closed.rejection_reason.as_deref(), Some(REMOVED_BY_STAFF));

        assert!(matches!(
            store.delete_direct(draft.id, "staff-1").await,
            Err(DeskError::NotFound(_))
        ));
    }
}
