/// Caller roles and the capabilities they grant
use crate::error::{DeskError, DeskResult};
use serde::{Deserialize, Serialize};

/// Role of an authenticated caller, as asserted by the auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Parent,
    Staff,
    Admin,
}

/// Something a caller may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Propose create/update/delete of own content
    SubmitContent,
    /// Approve or reject moderation requests
    ReviewModeration,
    /// Read every student's published reflections
    ViewAllReflections,
    /// Read a given student's published reflections
    ViewStudentReflections,
    /// Remove a reflection without going through moderation
    DeleteReflection,
    Comment,
    ManageTopics,
    ViewAuditLog,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> DeskResult<Self> {
        match s.to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "parent" => Ok(Role::Parent),
            "staff" | "teacher" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            _ => Err(DeskError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Capabilities granted to this role
    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Student => &[SubmitContent, Comment],
            Role::Parent => &[ViewStudentReflections, Comment],
            Role::Staff => &[
                ReviewModeration,
                ViewAllReflections,
                ViewStudentReflections,
                DeleteReflection,
                Comment,
            ],
            Role::Admin => &[
                ReviewModeration,
                ViewAllReflections,
                ViewStudentReflections,
                DeleteReflection,
                Comment,
                ManageTopics,
                ViewAuditLog,
            ],
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Macro to require a capability on an authenticated caller
/// Usage: require_capability!(auth, Capability::ReviewModeration);
#[macro_export]
macro_rules! require_capability {
    ($auth:expr, $capability:expr) => {
        if !$auth.role.can($capability) {
            return Err($crate::error::DeskError::Unauthorized(format!(
                "Role {} may not {:?}",
                $auth.role.as_str(),
                $capability
            )));
        }
    };
}
