/// Topic API endpoints
use super::validate_body;
use crate::{
    auth::AuthContext,
    content::Topic,
    error::DeskResult,
    require_capability,
    roles::Capability,
    AppContext,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Build topic routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/topics", get(list_topics).post(create_topic))
        .route("/topics/:id/active", post(set_topic_active))
}

#[derive(Debug, Serialize)]
struct TopicsResponse {
    topics: Vec<Topic>,
}

/// Topics students can currently write under
async fn list_topics(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> DeskResult<Json<TopicsResponse>> {
    let topics = ctx.topics.list_active().await?;
    Ok(Json(TopicsResponse { topics }))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateTopicRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    description: Option<String>,
}

async fn create_topic(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<CreateTopicRequest>,
) -> DeskResult<(StatusCode, Json<Topic>)> {
    require_capability!(auth, Capability::ManageTopics);
    validate_body(&req)?;

    let topic = ctx
        .topics
        .create(&req.title, req.description.as_deref())
        .await?;
    tracing::info!("Topic {} created by {}", topic.id, auth.user_id);

    Ok((StatusCode::CREATED, Json(topic)))
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    active: bool,
}

/// Open or close a topic for new reflections
async fn set_topic_active(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> DeskResult<Json<Topic>> {
    require_capability!(auth, Capability::ManageTopics);

    ctx.topics.set_active(id, req.active).await?;
    Ok(Json(ctx.topics.get(id).await?))
}
