/// Published student images and learning entries
use crate::{
    auth::AuthContext,
    content::{LearningEntry, StudentImage},
    error::DeskResult,
    require_capability,
    roles::Capability,
    AppContext,
};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// Build image and learning entry routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/images/:student_id", get(list_images))
        .route("/learning/:student_id", get(list_learning))
}

#[derive(Debug, Serialize)]
struct ImagesResponse {
    images: Vec<StudentImage>,
}

#[derive(Debug, Serialize)]
struct LearningResponse {
    entries: Vec<LearningEntry>,
}

async fn list_images(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(student_id): Path<String>,
) -> DeskResult<Json<ImagesResponse>> {
    if auth.user_id != student_id {
        require_capability!(auth, Capability::ViewStudentReflections);
    }

    let images = ctx.images.fetch_by_student(&student_id).await?;
    Ok(Json(ImagesResponse { images }))
}

async fn list_learning(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(student_id): Path<String>,
) -> DeskResult<Json<LearningResponse>> {
    if auth.user_id != student_id {
        require_capability!(auth, Capability::ViewStudentReflections);
    }

    let entries = ctx.learning.fetch_by_student(&student_id).await?;
    Ok(Json(LearningResponse { entries }))
}
