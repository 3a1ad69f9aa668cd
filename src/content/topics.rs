/// Reflection topics
use crate::db::parse_timestamp;
use crate::error::{DeskError, DeskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TopicStore {
    db: SqlitePool,
}

impl TopicStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, title: &str, description: Option<&str>) -> DeskResult<Topic> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DeskError::Validation("Topic title cannot be empty".to_string()));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO topics (title, description, is_active, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(title)
        .bind(description)
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(Topic {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            description: description.map(str::to_string),
            is_active: true,
            created_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> DeskResult<Topic> {
        let row = sqlx::query(
            "SELECT id, title, description, is_active, created_at FROM topics WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("Topic {} not found", id)))?;

        parse_topic(&row)
    }

    pub async fn list_active(&self) -> DeskResult<Vec<Topic>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, is_active, created_at
            FROM topics
            WHERE is_active = 1
            ORDER BY title ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(parse_topic).collect()
    }

    pub async fn set_active(&self, id: i64, active: bool) -> DeskResult<()> {
        let result = sqlx::query("UPDATE topics SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DeskError::NotFound(format!("Topic {} not found", id)));
        }
        Ok(())
    }
}

/// Precondition for writing a reflection under a topic
pub(crate) async fn require_active(conn: &mut SqliteConnection, id: i64) -> DeskResult<()> {
    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match active {
        None => Err(DeskError::NotFound(format!("Topic {} not found", id))),
        Some(false) => Err(DeskError::Validation(format!("Topic {} is not active", id))),
        Some(true) => Ok(()),
    }
}

fn parse_topic(row: &SqliteRow) -> DeskResult<Topic> {
    let created_at: String = row.get("created_at");
    Ok(Topic {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        is_active: row.get("is_active"),
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn test_create_and_list_active() {
        let pool = create_memory_pool().await.unwrap();
        let topics = TopicStore::new(pool.clone());

        let learned = topics.create("What I Learned Today", None).await.unwrap();
        let feelings = topics
            .create("How I Felt", Some("Emotions check-in"))
            .await
            .unwrap();
        topics.set_active(feelings.id, false).await.unwrap();

        let active = topics.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "What I Learned Today");

        let mut conn = pool.acquire().await.unwrap();
        assert!(require_active(&mut conn, learned.id).await.is_ok());
        assert!(matches!(
            require_active(&mut conn, feelings.id).await,
            Err(DeskError::Validation(_))
        ));
        assert!(matches!(
            require_active(&mut conn, 404).await,
            Err(DeskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let pool = create_memory_pool().await.unwrap();
        let topics = TopicStore::new(pool);
        assert!(topics.create("   ", None).await.is_err());
        assert!(matches!(topics.get(1).await, Err(DeskError::NotFound(_))));
    }
}
