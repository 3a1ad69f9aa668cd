/// Moderation API endpoints
///
/// Students queue changes here; staff list, inspect and resolve them.
use super::SubmittedResponse;
use crate::{
    audit::AuditLogEntry,
    auth::AuthContext,
    error::{DeskError, DeskResult},
    moderation::{ActionType, EntityType, FieldChange, ModerationRequest, RequestStatus, Snapshot},
    require_capability,
    roles::Capability,
    AppContext,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 500;

/// Build moderation routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/moderation/requests", post(submit_request).get(list_requests))
        .route("/moderation/requests/mine", get(list_my_requests))
        .route("/moderation/requests/:id", get(get_request))
        .route("/moderation/requests/:id/approve", post(approve_request))
        .route("/moderation/requests/:id/reject", post(reject_request))
        .route("/moderation/audit", get(list_audit))
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    entity_type: EntityType,
    action_type: ActionType,
    #[serde(default)]
    entity_id: Option<i64>,
    #[serde(default)]
    new_content: Option<Snapshot>,
}

/// Queue a create/update/delete for review
async fn submit_request(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<SubmitRequest>,
) -> DeskResult<(StatusCode, Json<SubmittedResponse>)> {
    require_capability!(auth, Capability::SubmitContent);

    let request = ctx
        .intake
        .submit(
            &auth.user_id,
            req.entity_type,
            req.action_type,
            req.entity_id,
            req.new_content,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedResponse {
            request_id: request.id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct ListRequestsQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListRequestsResponse {
    requests: Vec<ModerationRequest>,
}

/// Review queue; `status=all` drops the filter
async fn list_requests(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<ListRequestsQuery>,
) -> DeskResult<Json<ListRequestsResponse>> {
    require_capability!(auth, Capability::ReviewModeration);

    let status = match query.status.as_deref() {
        None | Some("") => Some(RequestStatus::Pending),
        Some("all") => None,
        Some(s) => Some(RequestStatus::from_str(s)?),
    };

    let requests = ctx.requests.list(status).await?;
    Ok(Json(ListRequestsResponse { requests }))
}

/// The caller's own requests, newest first
async fn list_my_requests(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> DeskResult<Json<ListRequestsResponse>> {
    require_capability!(auth, Capability::SubmitContent);

    let requests = ctx.requests.list_for_student(&auth.user_id).await?;
    Ok(Json(ListRequestsResponse { requests }))
}

#[derive(Debug, Serialize)]
struct RequestDetail {
    #[serde(flatten)]
    request: ModerationRequest,
    changes: Vec<FieldChange>,
}

/// One request with its field-level diff
async fn get_request(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<RequestDetail>> {
    let request = ctx.requests.get(id).await?;

    if !auth.role.can(Capability::ReviewModeration) && request.student_id != auth.user_id {
        return Err(DeskError::Unauthorized(format!(
            "Moderation request {} belongs to another student",
            id
        )));
    }

    let changes = request.changes();
    Ok(Json(RequestDetail { request, changes }))
}

/// Approve a pending request
async fn approve_request(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<ModerationRequest>> {
    require_capability!(auth, Capability::ReviewModeration);

    let request = ctx.resolver.approve(id, &auth.user_id).await?;
    Ok(Json(request))
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    #[serde(default)]
    reason: Option<String>,
}

/// Reject a pending request
async fn reject_request(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    body: Option<Json<RejectBody>>,
) -> DeskResult<Json<ModerationRequest>> {
    require_capability!(auth, Capability::ReviewModeration);

    let body = body.map(|Json(body)| body).unwrap_or_default();
    let request = ctx
        .resolver
        .reject(id, &auth.user_id, body.reason.as_deref())
        .await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AuditResponse {
    entries: Vec<AuditLogEntry>,
}

/// Most recent audit entries
async fn list_audit(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<AuditQuery>,
) -> DeskResult<Json<AuditResponse>> {
    require_capability!(auth, Capability::ViewAuditLog);

    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let entries = ctx.audit.recent(limit).await?;
    Ok(Json(AuditResponse { entries }))
}
