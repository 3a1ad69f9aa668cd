/// API routes and handlers
pub mod moderation;
pub mod reflections;
pub mod student_work;
pub mod topics;

use crate::context::AppContext;
use crate::error::{DeskError, DeskResult};
use axum::Router;
use serde::Serialize;
use validator::Validate;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(moderation::routes())
        .merge(reflections::routes())
        .merge(student_work::routes())
        .merge(topics::routes())
}

/// Body returned when a change has been queued for review
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub request_id: i64,
}

/// Run derive-based checks on a request body
pub(crate) fn validate_body<T: Validate>(body: &T) -> DeskResult<()> {
    body.validate()
        .map_err(|e| DeskError::Validation(e.to_string().replace('\n', "; ")))
}
