/// Learning entries
use super::{merge_optional_text, text_field, ContentKind, EntityRecord, FieldKind, FieldSpec};
use crate::db::parse_timestamp;
use crate::error::{DeskError, DeskResult};
use crate::moderation::{EntityType, ModerationRequest, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

const LEARNING_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("title", FieldKind::Text, true),
    FieldSpec::new("description", FieldKind::OptionalText, false),
    FieldSpec::new("subject", FieldKind::OptionalText, false),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEntry {
    pub id: i64,
    pub student_id: String,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LearningEntryStore {
    db: SqlitePool,
}

impl LearningEntryStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn fetch(&self, id: i64) -> DeskResult<LearningEntry> {
        let mut conn = self.db.acquire().await?;
        load_row(&mut conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Learning entry {} not found", id)))
    }

    pub async fn fetch_by_student(&self, student_id: &str) -> DeskResult<Vec<LearningEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, title, description, subject, created_at, updated_at
            FROM learning_entries
            WHERE student_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_entry).collect()
    }
}

/// Moderation behaviour for the `learning_entry` tag
pub struct LearningEntryKind;

#[async_trait]
impl ContentKind for LearningEntryKind {
    fn entity_type(&self) -> EntityType {
        EntityType::LearningEntry
    }

    fn fields(&self) -> &'static [FieldSpec] {
        LEARNING_FIELDS
    }

    async fn load(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<EntityRecord>> {
        Ok(load_row(conn, id).await?.map(|entry| {
            let snapshot = match json!({
                "title": entry.title,
                "description": entry.description,
                "subject": entry.subject,
            }) {
                Value::Object(map) => map,
                _ => Snapshot::new(),
            };
            EntityRecord {
                id: entry.id,
                owner_id: entry.student_id,
                snapshot,
            }
        }))
    }

    async fn publish(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<i64> {
        let content = request.new_content.as_ref().ok_or_else(|| {
            DeskError::Internal(format!("Request {} carries no new content", request.id))
        })?;
        let title = text_field(content, "title")
            .ok_or_else(|| DeskError::Validation("Required field 'title' is missing".to_string()))?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO learning_entries (student_id, title, description, subject, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.student_id)
        .bind(title)
        .bind(text_field(content, "description"))
        .bind(text_field(content, "subject"))
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn replace(&self, conn: &mut SqliteConnection, id: i64, content: &Snapshot) -> DeskResult<()> {
        let current = load_row(conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Learning entry {} not found", id)))?;

        sqlx::query(
            r#"
            UPDATE learning_entries
            SET title = ?, description = ?, subject = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(text_field(content, "title").unwrap_or(current.title))
        .bind(merge_optional_text(content, "description", current.description))
        .bind(merge_optional_text(content, "subject", current.subject))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn remove(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        let result = sqlx::query("DELETE FROM learning_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Learning entry {} not found", id)));
        }
        Ok(())
    }
}

async fn load_row(conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<LearningEntry>> {
    let row = sqlx::query(
        r#"
        SELECT id, student_id, title, description, subject, created_at, updated_at
        FROM learning_entries
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_entry).transpose()
}

fn parse_entry(row: &SqliteRow) -> DeskResult<LearningEntry> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(LearningEntry {
        id: row.get("id"),
        student_id: row.get("student_id"),
        title: row.get("title"),
        description: row.get("description"),
        subject: row.get("subject"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
