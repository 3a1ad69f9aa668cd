/// Approval resolver
///
/// `pending → approved | rejected`, nothing else. Each resolution is one
/// transaction: a compare-and-swap on the request status, the content side
/// effect, and the audit entry commit together or not at all. The loser of a
/// race sees [`DeskError::AlreadyResolved`] and nothing it did survives.
use super::requests::{self, Resolution};
use super::{ActionType, ModerationRequest, RequestStatus};
use crate::audit::{self, AuditEvent};
use crate::content::ContentRegistry;
use crate::db::begin_immediate;
use crate::error::{DeskError, DeskResult};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApprovalResolver {
    db: SqlitePool,
    registry: Arc<ContentRegistry>,
}

impl ApprovalResolver {
    pub fn new(db: SqlitePool, registry: Arc<ContentRegistry>) -> Self {
        Self { db, registry }
    }

    /// Approve a pending request and apply it to the content store
    pub async fn approve(&self, request_id: i64, reviewer_id: &str) -> DeskResult<ModerationRequest> {
        require_reviewer(reviewer_id)?;

        let mut tx = begin_immediate(&self.db).await?;
        let resolution = Resolution {
            status: RequestStatus::Approved,
            reviewer_id,
            rejection_reason: None,
            resolved_at: Utc::now(),
        };
        let mut request = claim(&mut tx, request_id, &resolution).await?;
        let kind = self.registry.get(request.entity_type)?;

        match request.action_type {
            ActionType::Create => {
                let entity_id = kind.publish(&mut tx, &request).await?;
                requests::assign_entity(&mut tx, request.id, entity_id).await?;
                request.entity_id = Some(entity_id);
            }
            ActionType::Update => {
                let entity_id = target(&request)?;
                let content = request.new_content.as_ref().ok_or_else(|| {
                    DeskError::Internal(format!("Request {} carries no new content", request.id))
                })?;
                kind.replace(&mut tx, entity_id, content).await?;
            }
            ActionType::Delete => {
                kind.remove(&mut tx, target(&request)?).await?;
            }
        }

        audit::record(
            &mut tx,
            AuditEvent {
                actor_id: reviewer_id,
                action: "moderation.approve",
                entity_type: Some(request.entity_type),
                entity_id: request.entity_id,
                request_id: Some(request.id),
                details: None,
            },
        )
        .await?;

        tx.commit().await?;

        info!(
            "Request {} approved by {}: {} {} {:?}",
            request.id,
            reviewer_id,
            request.action_type.as_str(),
            request.entity_type,
            request.entity_id
        );
        Ok(request)
    }

    /// Reject a pending request; published content keeps its prior state
    pub async fn reject(
        &self,
        request_id: i64,
        reviewer_id: &str,
        reason: Option<&str>,
    ) -> DeskResult<ModerationRequest> {
        require_reviewer(reviewer_id)?;

        let mut tx = begin_immediate(&self.db).await?;
        let resolution = Resolution {
            status: RequestStatus::Rejected,
            reviewer_id,
            rejection_reason: reason,
            resolved_at: Utc::now(),
        };
        let request = claim(&mut tx, request_id, &resolution).await?;
        let kind = self.registry.get(request.entity_type)?;

        kind.unstage(&mut tx, &request).await?;

        audit::record(
            &mut tx,
            AuditEvent {
                actor_id: reviewer_id,
                action: "moderation.reject",
                entity_type: Some(request.entity_type),
                entity_id: request.entity_id,
                request_id: Some(request.id),
                details: reason,
            },
        )
        .await?;

        tx.commit().await?;

        info!("Request {} rejected by {}", request.id, reviewer_id);
        Ok(request)
    }
}

/// Win the status swap or explain why not; returns the resolved request
async fn claim(
    conn: &mut SqliteConnection,
    request_id: i64,
    resolution: &Resolution<'_>,
) -> DeskResult<ModerationRequest> {
    if !requests::compare_and_resolve(conn, request_id, resolution).await? {
        return Err(match requests::fetch(conn, request_id).await? {
            None => DeskError::NotFound(format!("Moderation request {} not found", request_id)),
            Some(_) => {
                warn!("Request {} was already resolved", request_id);
                DeskError::AlreadyResolved(request_id)
            }
        });
    }

    requests::fetch(conn, request_id)
        .await?
        .ok_or_else(|| DeskError::Internal(format!("Request {} vanished mid-resolution", request_id)))
}

fn target(request: &ModerationRequest) -> DeskResult<i64> {
    request
        .entity_id
        .ok_or_else(|| DeskError::Internal(format!("Request {} has no entity id", request.id)))
}

fn require_reviewer(reviewer_id: &str) -> DeskResult<()> {
    if reviewer_id.trim().is_empty() {
        return Err(DeskError::Validation("Reviewer id is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::ServerConfig;
    use crate::content::{LearningEntryStore, StudentImageStore};
    use crate::db::create_memory_pool;
    use crate::moderation::{EntityType, RequestRepository, Snapshot, SubmissionIntake};
    use crate::rate_limit::RateLimiter;
    use serde_json::{json, Value};

    struct Harness {
        pool: SqlitePool,
        intake: SubmissionIntake,
        resolver: ApprovalResolver,
    }

    async fn harness() -> Harness {
        let pool = create_memory_pool().await.unwrap();
        let registry = Arc::new(ContentRegistry::new());
        let limiter = Arc::new(RateLimiter::new(
            &ServerConfig::for_testing("0123456789abcdef0123456789abcdef").rate_limit,
        ));
        Harness {
            intake: SubmissionIntake::new(pool.clone(), registry.clone(), limiter),
            resolver: ApprovalResolver::new(pool.clone(), registry),
            pool,
        }
    }

    fn content(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_approve_create_publishes_new_content() {
        let h = harness().await;
        let request = h
            .intake
            .submit(
                "student-1",
                EntityType::LearningEntry,
                ActionType::Create,
                None,
                Some(content(json!({"title": "Magnets", "description": "They stick"}))),
            )
            .await
            .unwrap();

        let resolved = h.resolver.approve(request.id, "staff-1").await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Approved);
        assert_eq!(resolved.reviewer_id.as_deref(), Some("staff-1"));
        assert!(resolved.resolved_at.is_some());

        let entry = LearningEntryStore::new(h.pool.clone())
            .fetch(resolved.entity_id.unwrap())
            .await
            .unwrap();
        assert_eq!(entry.title, "Magnets");
        assert_eq!(entry.description.as_deref(), Some("They stick"));
        assert_eq!(entry.student_id, "student-1");

        let stored = RequestRepository::new(h.pool.clone()).get(request.id).await.unwrap();
        assert_eq!(stored.entity_id, resolved.entity_id);
    }

    #[tokio::test]
    async fn test_second_resolution_is_rejected_without_side_effects() {
        let h = harness().await;
        let request = h
            .intake
            .submit(
                "student-1",
                EntityType::StudentImage,
                ActionType::Create,
                None,
                Some(content(json!({"image_url": "https://img/kite.png"}))),
            )
            .await
            .unwrap();

        h.resolver.approve(request.id, "staff-1").await.unwrap();

        assert!(matches!(
            h.resolver.approve(request.id, "staff-2").await,
            Err(DeskError::AlreadyResolved(id)) if id == request.id
        ));
        assert!(matches!(
            h.resolver.reject(request.id, "staff-2", Some("late")).await,
            Err(DeskError::AlreadyResolved(_))
        ));

        let images = StudentImageStore::new(h.pool.clone())
            .fetch_by_student("student-1")
            .await
            .unwrap();
        assert_eq!(images.len(), 1);

        let stored = RequestRepository::new(h.pool.clone()).get(request.id).await.unwrap();
        assert_eq!(stored.reviewer_id.as_deref(), Some("staff-1"));
        assert!(stored.rejection_reason.is_none());

        let audit = AuditLog::new(h.pool.clone()).recent(10).await.unwrap();
        assert_eq!(audit.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let h = harness().await;
        assert!(matches!(
            h.resolver.approve(5, "staff-1").await,
            Err(DeskError::NotFound(_))
        ));
        assert!(matches!(
            h.resolver.reject(5, "staff-1", None).await,
            Err(DeskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_side_effect_leaves_request_pending() {
        let h = harness().await;
        let create = h
            .intake
            .submit(
                "student-1",
                EntityType::LearningEntry,
                ActionType::Create,
                None,
                Some(content(json!({"title": "Clouds"}))),
            )
            .await
            .unwrap();
        let entry_id = h.resolver.approve(create.id, "staff-1").await.unwrap().entity_id.unwrap();

        let update = h
            .intake
            .submit(
                "student-1",
                EntityType::LearningEntry,
                ActionType::Update,
                Some(entry_id),
                Some(content(json!({"title": "Rain clouds"}))),
            )
            .await
            .unwrap();

        // Entity disappears underneath the pending update
        sqlx::query("DELETE FROM learning_entries WHERE id = ?")
            .bind(entry_id)
            .execute(&h.pool)
            .await
            .unwrap();

        assert!(matches!(
            h.resolver.approve(update.id, "staff-1").await,
            Err(DeskError::NotFound(_))
        ));

        let stored = RequestRepository::new(h.pool.clone()).get(update.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.reviewer_id.is_none());
        assert!(stored.resolved_at.is_none());
    }

    #[tokio::test]
    async fn test_reject_keeps_reason_verbatim() {
        let h = harness().await;
        let request = h
            .intake
            .submit(
                "student-1",
                EntityType::LearningEntry,
                ActionType::Create,
                None,
                Some(content(json!({"title": "Stars"}))),
            )
            .await
            .unwrap();

        let resolved = h.resolver.reject(request.id, "staff-1", Some("")).await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Rejected);
        assert_eq!(resolved.rejection_reason.as_deref(), Some(""));
        assert!(resolved.entity_id.is_none());
    }

    #[tokio::test]
    async fn test_blank_reviewer_rejected() {
        let h = harness().await;
        assert!(matches!(
            h.resolver.approve(1, " ").await,
            Err(DeskError::Validation(_))
        ));
    }
}
