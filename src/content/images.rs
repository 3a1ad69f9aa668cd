/// Student images
///
/// Images are referenced by URL; upload and storage happen elsewhere.
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

const IMAGE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("image_url", FieldKind::Text, true),
    FieldSpec::new("caption", FieldKind::OptionalText, false),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentImage {
    pub id: i64,
    pub student_id: String,
    pub image_url: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StudentImageStore {
    db: SqlitePool,
}

impl StudentImageStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn fetch(&self, id: i64) -> DeskResult<StudentImage> {
        let mut conn = self.db.acquire().await?;
        load_row(&mut conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Student image {} not found", id)))
    }

    pub async fn fetch_by_student(&self, student_id: &str) -> DeskResult<Vec<StudentImage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, student_id, image_url, caption, created_at, updated_at
            FROM student_images
            WHERE student_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_image).collect()
    }
}

/// Moderation behaviour for the `student_image` tag
pub struct StudentImageKind;

#[async_trait]
impl ContentKind for StudentImageKind {
    fn entity_type(&self) -> EntityType {
        EntityType::StudentImage
    }

    fn fields(&self) -> &'static [FieldSpec] {
        IMAGE_FIELDS
    }

    async fn load(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<EntityRecord>> {
        Ok(load_row(conn, id).await?.map(|image| {
            let snapshot = match json!({
                "image_url": image.image_url,
                "caption": image.caption,
            }) {
                Value::Object(map) => map,
                _ => Snapshot::new(),
            };
            EntityRecord {
                id: image.id,
                owner_id: image.student_id,
                snapshot,
            }
        }))
    }

    async fn publish(&self, conn: &mut SqliteConnection, request: &ModerationRequest) -> DeskResult<i64> {
        let content = request.new_content.as_ref().ok_or_else(|| {
            DeskError::Internal(format!("Request {} carries no new content", request.id))
        })?;
        let image_url = text_field(content, "image_url")
            .ok_or_else(|| DeskError::Validation("Required field 'image_url' is missing".to_string()))?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO student_images (student_id, image_url, caption, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.student_id)
        .bind(image_url)
        .bind(text_field(content, "caption"))
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn replace(&self, conn: &mut SqliteConnection, id: i64, content: &Snapshot) -> DeskResult<()> {
        let current = load_row(conn, id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("Student image {} not found", id)))?;

        sqlx::query(
            "UPDATE student_images SET image_url = ?, caption = ?, updated_at = ? WHERE id = ?",
        )
        .bind(text_field(content, "image_url").unwrap_or(current.image_url))
        .bind(merge_optional_text(content, "caption", current.caption))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn remove(&self, conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
        let result = sqlx::query("DELETE FROM student_images WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Student image {} not found", id)));
        }
        Ok(())
    }
}

async fn load_row(conn: &mut SqliteConnection, id: i64) -> DeskResult<Option<StudentImage>> {
    let row = sqlx::query(
        r#"
        SELECT id, student_id, image_url, caption, created_at, updated_at
        FROM student_images
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_image).transpose()
}

fn parse_image(row: &SqliteRow) -> DeskResult<StudentImage> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(StudentImage {
        id: row.get("id"),
        student_id: row.get("student_id"),
        image_url: row.get("image_url"),
        caption: row.get("caption"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
