/// Reflection comment threads
///
/// Append-only: there is no edit or delete. Comments are accepted whatever
/// the moderation status of the reflection.
use crate::db::{begin_immediate, parse_timestamp};
use crate::error::{DeskError, DeskResult};
use crate::roles::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Longest comment body accepted
pub const MAX_COMMENT_LENGTH: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub reflection_id: i64,
    pub author_id: String,
    pub author_role: Role,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CommentThread {
    db: SqlitePool,
}

impl CommentThread {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append a comment; the author's role is frozen at this moment
    pub async fn add_comment(
        &self,
        reflection_id: i64,
        author_id: &str,
        author_role: Role,
        body: &str,
    ) -> DeskResult<Comment> {
        let body = body.trim();
        if body.is_empty() {
            return Err(DeskError::Validation("Comment cannot be empty".to_string()));
        }
        if body.chars().count() > MAX_COMMENT_LENGTH {
            return Err(DeskError::Validation(format!(
                "Comment exceeds {} characters",
                MAX_COMMENT_LENGTH
            )));
        }

        let mut tx = begin_immediate(&self.db).await?;
        let mut now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO reflection_comments (reflection_id, author_id, author_role, body, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(reflection_id)
        .bind(author_id)
        .bind(author_role.as_str())
        .bind(body)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DeskError::NotFound(format!("Reflection {} not found", reflection_id))
            }
            _ => DeskError::Database(e),
        })?;
        let id = result.last_insert_rowid();

        // Timestamps never run backwards within a thread
        let previous: Option<String> = sqlx::query_scalar(
            r#"
            SELECT created_at FROM reflection_comments
            WHERE reflection_id = ? AND id < ?
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(reflection_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(previous) = previous {
            let previous = parse_timestamp(&previous)?;
            if previous > now {
                now = previous;
                sqlx::query("UPDATE reflection_comments SET created_at = ? WHERE id = ?")
                    .bind(now.to_rfc3339())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        let comment = Comment {
            id,
            reflection_id,
            author_id: author_id.to_string(),
            author_role,
            body: body.to_string(),
            created_at: now,
        };
        debug!(
            "Comment {} added to reflection {} by {}",
            comment.id, reflection_id, author_id
        );
        Ok(comment)
    }

    /// Comments in the order they were written (`created_at` is non-decreasing)
    pub async fn list_comments(&self, reflection_id: i64) -> DeskResult<Vec<Comment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, reflection_id, author_id, author_role, body, created_at
            FROM reflection_comments
            WHERE reflection_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(reflection_id)
        .fetch_all(&self.db)
        .await?;

        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.get("author_role");
            let created_at: String = row.get("created_at");
            comments.push(Comment {
                id: row.get("id"),
                reflection_id: row.get("reflection_id"),
                author_id: row.get("author_id"),
                author_role: Role::from_str(&role)?,
                body: row.get("body"),
                created_at: parse_timestamp(&created_at)?,
            });
        }

        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    async fn setup_with_reflection(status: &str) -> (SqlitePool, i64) {
        let pool = create_memory_pool().await.unwrap();
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO topics (title, is_active, created_at) VALUES ('Today', 1, ?)")
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();
        let result = sqlx::query(
            r#"
            INSERT INTO reflections (topic_id, student_id, content, status, week, created_at, updated_at)
            VALUES (1, 'student-1', 'Seeds need water', ?, 'Week 2', ?, ?)
            "#,
        )
        .bind(status)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        (pool, result.last_insert_rowid())
    }

    #[tokio::test]
    async fn test_add_and_list_in_order() {
        let (pool, reflection_id) = setup_with_reflection("approved").await;
        let thread = CommentThread::new(pool);

        thread
            .add_comment(reflection_id, "staff-1", Role::Staff, "Great observation!")
            .await
            .unwrap();
        thread
            .add_comment(reflection_id, "parent-1", Role::Parent, "  So proud  ")
            .await
            .unwrap();

        let comments = thread.list_comments(reflection_id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].author_role, Role::Staff);
        assert_eq!(comments[1].body, "So proud");
        assert!(comments[0].created_at <= comments[1].created_at);
    }

    #[tokio::test]
    async fn test_comments_allowed_on_unpublished_reflection() {
        let (pool, reflection_id) = setup_with_reflection("pending_deletion").await;
        let thread = CommentThread::new(pool);

        assert!(thread
            .add_comment(reflection_id, "staff-1", Role::Staff, "Why delete this?")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_validation_and_missing_reflection() {
        let (pool, reflection_id) = setup_with_reflection("approved").await;
        let thread = CommentThread::new(pool);

        assert!(matches!(
            thread.add_comment(reflection_id, "staff-1", Role::Staff, "   ").await,
            Err(DeskError::Validation(_))
        ));
        let long = "a".repeat(MAX_COMMENT_LENGTH + 1);
        assert!(matches!(
            thread.add_comment(reflection_id, "staff-1", Role::Staff, &long).await,
            Err(DeskError::Validation(_))
        ));
        assert!(matches!(
            thread.add_comment(999, "staff-1", Role::Staff, "Hello").await,
            Err(DeskError::NotFound(_))
        ));
        assert!(thread.list_comments(999).await.unwrap().is_empty());
    }
}
