/// Submission intake
///
/// Turns a student's create/update/delete into a pending
/// [`ModerationRequest`]. Published content is never touched here; only the
/// display staging of the entity's [`ContentKind`](crate::content::ContentKind)
/// runs, inside the same transaction as the request insert.
use super::requests::{self, NewRequest};
use super::{ActionType, EntityType, ModerationRequest, Snapshot};
use crate::content::ContentRegistry;
use crate::db::begin_immediate;
use crate::error::{DeskError, DeskResult};
use crate::rate_limit::RateLimiter;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct SubmissionIntake {
    db: SqlitePool,
    registry: Arc<ContentRegistry>,
    rate_limiter: Arc<RateLimiter>,
}

impl SubmissionIntake {
    pub fn new(db: SqlitePool, registry: Arc<ContentRegistry>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            db,
            registry,
            rate_limiter,
        }
    }

    /// Record a proposed change for review
    pub async fn submit(
        &self,
        student_id: &str,
        entity_type: EntityType,
        action_type: ActionType,
        entity_id: Option<i64>,
        new_content: Option<Snapshot>,
    ) -> DeskResult<ModerationRequest> {
        if student_id.trim().is_empty() {
            return Err(DeskError::Validation("Student id is required".to_string()));
        }

        check_shape(action_type, entity_id, new_content.as_ref())?;

        let kind = self.registry.get(entity_type)?;
        if let Some(content) = &new_content {
            kind.validate(action_type, content)?;
        }

        let mut new_content = new_content;
        let mut tx = begin_immediate(&self.db).await?;

        let old_content = match (action_type, entity_id) {
            (ActionType::Create, _) => {
                if let Some(content) = new_content.as_mut() {
                    kind.prepare(&mut tx, action_type, content).await?;
                }
                None
            }
            (_, Some(id)) => {
                let record = kind.load(&mut tx, id).await?.ok_or_else(|| {
                    DeskError::NotFound(format!("{} {} not found", entity_type, id))
                })?;

                if record.owner_id != student_id {
                    return Err(DeskError::Unauthorized(format!(
                        "{} {} belongs to another student",
                        entity_type, id
                    )));
                }

                if requests::has_pending(&mut tx, entity_type, id).await? {
                    return Err(DeskError::DuplicatePendingRequest {
                        entity_type: entity_type.to_string(),
                        entity_id: id,
                    });
                }

                kind.check_mutable(&record)?;

                if let Some(content) = new_content.as_mut() {
                    kind.prepare(&mut tx, action_type, content).await?;
                }

                // An update stores the full resulting snapshot, not just the edited fields
                if let Some(proposed) = new_content.take() {
                    let mut merged = record.snapshot.clone();
                    merged.extend(proposed);
                    new_content = Some(merged);
                }

                Some(record.snapshot)
            }
            (_, None) => {
                return Err(DeskError::Validation(format!(
                    "{} requires an entity id",
                    action_type.as_str()
                )))
            }
        };

        // Quota is only spent on submissions that will be recorded
        self.rate_limiter.check_submission(student_id)?;

        let request = requests::insert(
            &mut tx,
            NewRequest {
                entity_type,
                action_type,
                entity_id,
                old_content,
                new_content,
                student_id,
            },
        )
        .await?;

        kind.stage(&mut tx, &request).await?;
        tx.commit().await?;

        info!(
            "Moderation request {} submitted: {} {} by {}",
            request.id,
            action_type.as_str(),
            entity_type,
            student_id
        );
        debug!("Request {} targets entity {:?}", request.id, request.entity_id);

        Ok(request)
    }
}

/// Structural rules that hold for every entity type
fn check_shape(
    action_type: ActionType,
    entity_id: Option<i64>,
    new_content: Option<&Snapshot>,
) -> DeskResult<()> {
    match action_type {
        ActionType::Create => {
            if entity_id.is_some() {
                return Err(DeskError::Validation(
                    "create must not reference an existing entity".to_string(),
                ));
            }
            if new_content.is_none() {
                return Err(DeskError::Validation("create requires new_content".to_string()));
            }
        }
        ActionType::Update => {
            if entity_id.is_none() {
                return Err(DeskError::Validation("update requires an entity id".to_string()));
            }
            if new_content.is_none() {
                return Err(DeskError::Validation("update requires new_content".to_string()));
            }
        }
        ActionType::Delete => {
            if entity_id.is_none() {
                return Err(DeskError::Validation("delete requires an entity id".to_string()));
            }
            if new_content.is_some() {
                return Err(DeskError::Validation(
                    "delete must not include new_content".to_string(),
                ));
            }
        }
    }

    Ok(())
}
