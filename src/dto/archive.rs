use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{dto::format_system_time, services::archive::ArchivedFile};

/// One finished archive as exposed over HTTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct ArchivedFileResponse {
    pub filename: String,
    /// Path relative to the archive root; download it under `/archived/{path}`.
    pub path: String,
    /// RFC 3339 creation timestamp.
    pub created: String,
}

impl From<ArchivedFile> for ArchivedFileResponse {
    fn from(value: ArchivedFile) -> Self {
        Self {
            filename: value.filename,
            path: value.path,
            created: format_system_time(value.created),
        }
    }
}

/// Archived files, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveListResponse {
    pub files: Vec<ArchivedFileResponse>,
}

/// Destructive operation requested on an archived file.
#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveAction {
    Remove,
    Rename,
}

/// Form posted to `/archive`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ArchiveActionForm {
    pub action: ArchiveAction,
    /// Path of the file relative to the archive root.
    #[validate(length(min = 1, max = 512))]
    pub filename: String,
    /// Target path relative to the archive root, required for `rename`.
    #[serde(default)]
    #[validate(length(max = 512))]
    pub newname: Option<String>,
}

/// Outcome message plus the refreshed listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveActionResponse {
    pub message: String,
    pub files: Vec<ArchivedFileResponse>,
}
