/// Reflection API endpoints
///
/// Student writes go through the moderation intake and answer with the id of
/// the queued request. Staff can also remove a reflection outright.
use super::{validate_body, SubmittedResponse};
use crate::{
    auth::AuthContext,
    comments::Comment,
    content::Reflection,
    error::{DeskError, DeskResult},
    moderation::{ActionType, EntityType, Snapshot},
    require_capability,
    roles::{Capability, Role},
    AppContext,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Build reflection routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/reflections", post(create_reflection))
        .route("/reflections/mine", get(list_mine))
        .route("/reflections/all", get(list_all))
        .route(
            "/reflections/:id",
            get(list_for_student)
                .put(update_reflection)
                .delete(delete_reflection),
        )
        .route("/reflections/student/:id", delete(request_deletion))
        .route("/reflections/:id/comments", post(add_comment).get(list_comments))
}

#[derive(Debug, Serialize)]
struct ReflectionsResponse {
    reflections: Vec<Reflection>,
}

/// Everything the caller wrote, drafts included
async fn list_mine(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> DeskResult<Json<ReflectionsResponse>> {
    require_capability!(auth, Capability::SubmitContent);

    let reflections = ctx.reflections.fetch_mine(&auth.user_id).await?;
    Ok(Json(ReflectionsResponse { reflections }))
}

/// Every published reflection
async fn list_all(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> DeskResult<Json<ReflectionsResponse>> {
    require_capability!(auth, Capability::ViewAllReflections);

    let reflections = ctx.reflections.fetch_all().await?;
    Ok(Json(ReflectionsResponse { reflections }))
}

/// Published reflections of one student
async fn list_for_student(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(student_id): Path<String>,
) -> DeskResult<Json<ReflectionsResponse>> {
    if auth.user_id != student_id {
        require_capability!(auth, Capability::ViewStudentReflections);
    }

    let reflections = ctx.reflections.fetch_by_student(&student_id).await?;
    Ok(Json(ReflectionsResponse { reflections }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateReflectionRequest {
    topic_id: i64,
    #[validate(length(min = 1, max = 10000))]
    content: String,
    #[serde(default)]
    #[validate(url)]
    attachment_url: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 50))]
    week: Option<String>,
}

/// Queue a new reflection for review
async fn create_reflection(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<CreateReflectionRequest>,
) -> DeskResult<(StatusCode, Json<SubmittedResponse>)> {
    require_capability!(auth, Capability::SubmitContent);
    validate_body(&req)?;

    let mut content = Snapshot::new();
    content.insert("topic_id".to_string(), Value::from(req.topic_id));
    content.insert("content".to_string(), Value::String(req.content));
    if let Some(url) = req.attachment_url {
        content.insert("attachment_url".to_string(), Value::String(url));
    }
    if let Some(week) = req.week {
        content.insert("week".to_string(), Value::String(week));
    }

    submitted(&ctx, &auth, ActionType::Create, None, Some(content)).await
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateReflectionRequest {
    #[serde(default)]
    topic_id: Option<i64>,
    #[serde(default)]
    #[validate(length(min = 1, max = 10000))]
    content: Option<String>,
    #[serde(default)]
    #[validate(url)]
    attachment_url: Option<String>,
}

/// Queue an edit of a published reflection
async fn update_reflection(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReflectionRequest>,
) -> DeskResult<(StatusCode, Json<SubmittedResponse>)> {
    require_capability!(auth, Capability::SubmitContent);
    validate_body(&req)?;

    let mut content = Snapshot::new();
    if let Some(topic_id) = req.topic_id {
        content.insert("topic_id".to_string(), Value::from(topic_id));
    }
    if let Some(body) = req.content {
        content.insert("content".to_string(), Value::String(body));
    }
    if let Some(url) = req.attachment_url {
        content.insert("attachment_url".to_string(), Value::String(url));
    }

    submitted(&ctx, &auth, ActionType::Update, Some(id), Some(content)).await
}

/// Queue removal of one of the caller's reflections
async fn request_deletion(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<(StatusCode, Json<SubmittedResponse>)> {
    require_capability!(auth, Capability::SubmitContent);

    submitted(&ctx, &auth, ActionType::Delete, Some(id), None).await
}

async fn submitted(
    ctx: &AppContext,
    auth: &AuthContext,
    action_type: ActionType,
    entity_id: Option<i64>,
    content: Option<Snapshot>,
) -> DeskResult<(StatusCode, Json<SubmittedResponse>)> {
    let request = ctx
        .intake
        .submit(&auth.user_id, EntityType::Reflection, action_type, entity_id, content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedResponse {
            request_id: request.id,
        }),
    ))
}

/// Staff removal without moderation
async fn delete_reflection(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<StatusCode> {
    require_capability!(auth, Capability::DeleteReflection);

    ctx.reflections.delete_direct(id, &auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
struct CommentRequest {
    #[validate(length(min = 1))]
    content: String,
}

#[derive(Debug, Serialize)]
struct CommentsResponse {
    comments: Vec<Comment>,
}

/// Students only see and join threads on their own reflections
async fn ensure_thread_access(ctx: &AppContext, auth: &AuthContext, reflection_id: i64) -> DeskResult<()> {
    let reflection = ctx.reflections.fetch(reflection_id).await?;

    if auth.role == Role::Student && reflection.student_id != auth.user_id {
        return Err(DeskError::Unauthorized(format!(
            "Reflection {} belongs to another student",
            reflection_id
        )));
    }
    Ok(())
}

/// Append a comment to a reflection's thread
async fn add_comment(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<CommentRequest>,
) -> DeskResult<(StatusCode, Json<Comment>)> {
    require_capability!(auth, Capability::Comment);
    validate_body(&req)?;
    ensure_thread_access(&ctx, &auth, id).await?;

    let comment = ctx
        .comments
        .add_comment(id, &auth.user_id, auth.role, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// A reflection's thread, oldest first
async fn list_comments(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> DeskResult<Json<CommentsResponse>> {
    ensure_thread_access(&ctx, &auth, id).await?;

    let comments = ctx.comments.list_comments(id).await?;
    Ok(Json(CommentsResponse { comments }))
}
