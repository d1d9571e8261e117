//! HTTP-facing operations on the archive root.

use crate::{
    dto::archive::{ArchiveAction, ArchiveActionForm, ArchiveActionResponse, ArchiveListResponse},
    error::ServiceError,
    state::SharedState,
};

/// List finished archives, leaving out those still being recorded.
pub async fn list_archived(state: &SharedState) -> Result<ArchiveListResponse, ServiceError> {
    let active = state.hub().active_archive_names();
    let archives = state.archives().clone();
    let files = tokio::task::spawn_blocking(move || archives.list(&active))
        .await
        .map_err(|err| ServiceError::Internal(format!("archive scan failed: {err}")))?;

    Ok(ArchiveListResponse {
        files: files.into_iter().map(Into::into).collect(),
    })
}

/// Remove or rename an archived file and return the refreshed listing.
pub async fn apply_action(
    state: &SharedState,
    form: ArchiveActionForm,
) -> Result<ArchiveActionResponse, ServiceError> {
    let archives = state.archives();
    let is_active = archives
        .resolve(&form.filename)
        .is_ok_and(|path| state.hub().is_recording(&path));
    if is_active {
        return Err(ServiceError::Conflict(format!(
            "'{}' is still being recorded",
            form.filename
        )));
    }

    let message = match form.action {
        ArchiveAction::Remove => {
            archives.remove(&form.filename).await?;
            format!("Removed '{}'.", form.filename)
        }
        ArchiveAction::Rename => {
            let newname = form
                .newname
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| ServiceError::InvalidInput("newname is required to rename".into()))?;
            let renamed = archives.rename(&form.filename, newname).await?;
            format!("Renamed '{}' to '{}'.", form.filename, renamed)
        }
    };

    let files = list_archived(state).await?.files;
    Ok(ArchiveActionResponse { message, files })
}
