use std::path::Path;

use axum::{
    Form, Json, Router,
    extract::State,
    routing::get,
};
use tower_http::services::ServeDir;
use validator::Validate;

use crate::{
    dto::archive::{ArchiveActionForm, ArchiveActionResponse, ArchiveListResponse},
    error::AppError,
    services::archive_service,
    state::SharedState,
};

/// Archive listing, file actions and downloads under `/archived/`.
pub fn router(archive_root: &Path) -> Router<SharedState> {
    Router::new()
        .route("/archive", get(list_archived).post(archive_action))
        .nest_service("/archived", ServeDir::new(archive_root))
}

#[utoipa::path(
    get,
    path = "/archive",
    tag = "archive",
    responses((status = 200, description = "Archived files, newest first", body = ArchiveListResponse))
)]
/// List finished archives.
pub async fn list_archived(
    State(state): State<SharedState>,
) -> Result<Json<ArchiveListResponse>, AppError> {
    Ok(Json(archive_service::list_archived(&state).await?))
}

#[utoipa::path(
    post,
    path = "/archive",
    tag = "archive",
    request_body(content = ArchiveActionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Action applied", body = ArchiveActionResponse),
        (status = 400, description = "Invalid form or file name"),
        (status = 403, description = "Path outside the archive root"),
        (status = 404, description = "File not found"),
        (status = 409, description = "File in use or target exists")
    )
)]
/// Remove or rename an archived file.
pub async fn archive_action(
    State(state): State<SharedState>,
    Form(form): Form<ArchiveActionForm>,
) -> Result<Json<ArchiveActionResponse>, AppError> {
    form.validate()?;
    Ok(Json(archive_service::apply_action(&state, form).await?))
}
