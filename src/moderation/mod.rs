/// Moderation workflow engine
///
/// Student changes become `ModerationRequest`s through [`SubmissionIntake`],
/// reviewers compare snapshots with [`diff`], and [`ApprovalResolver`] moves
/// each request from pending to approved or rejected exactly once.

pub mod diff;
pub mod intake;
pub mod requests;
pub mod resolver;

pub use diff::{diff, FieldChange, TextSegment};
pub use intake::SubmissionIntake;
pub use requests::RequestRepository;
pub use resolver::ApprovalResolver;

use crate::error::{DeskError, DeskResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of an entity's content at a point in time
pub type Snapshot = serde_json::Map<String, serde_json::Value>;

/// Kind of entity a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Reflection,
    StudentImage,
    LearningEntry,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Reflection => "reflection",
            EntityType::StudentImage => "student_image",
            EntityType::LearningEntry => "learning_entry",
        }
    }

    pub fn from_str(s: &str) -> DeskResult<Self> {
        match s {
            "reflection" => Ok(EntityType::Reflection),
            "student_image" => Ok(EntityType::StudentImage),
            "learning_entry" => Ok(EntityType::LearningEntry),
            _ => Err(DeskError::Validation(format!("Invalid entity type: {}", s))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change a request proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> DeskResult<Self> {
        match s {
            "create" => Ok(ActionType::Create),
            "update" => Ok(ActionType::Update),
            "delete" => Ok(ActionType::Delete),
            _ => Err(DeskError::Validation(format!("Invalid action type: {}", s))),
        }
    }
}

/// Request lifecycle state; approved and rejected are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> DeskResult<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(DeskError::Validation(format!("Invalid request status: {}", s))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// A recorded proposal to create, update or delete an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRequest {
    pub id: i64,
    pub entity_type: EntityType,
    pub action_type: ActionType,
    pub entity_id: Option<i64>,
    pub old_content: Option<Snapshot>,
    pub new_content: Option<Snapshot>,
    pub status: RequestStatus,
    pub student_id: String,
    pub reviewer_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ModerationRequest {
    /// Field-level comparison of the snapshots, for reviewers
    pub fn changes(&self) -> Vec<FieldChange> {
        diff(self.old_content.as_ref(), self.new_content.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_round_trip_names() {
        for ty in [
            EntityType::Reflection,
            EntityType::StudentImage,
            EntityType::LearningEntry,
        ] {
            assert_eq!(EntityType::from_str(ty.as_str()).unwrap(), ty);
        }
        assert!(EntityType::from_str("blog_post").is_err());
    }

    #[test]
    fn test_action_type_from_str() {
        assert_eq!(ActionType::from_str("delete").unwrap(), ActionType::Delete);
        assert!(ActionType::from_str("archive").is_err());
    }

    #[test]
    fn test_request_status_terminal() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert_eq!(
            RequestStatus::from_str("PENDING").unwrap(),
            RequestStatus::Pending
        );
    }

    #[test]
    fn test_serde_tags_match_storage_names() {
        let json = serde_json::to_value(EntityType::StudentImage).unwrap();
        assert_eq!(json, "student_image");
        let parsed: ActionType = serde_json::from_value(serde_json::json!("update")).unwrap();
        assert_eq!(parsed, ActionType::Update);
    }
}
