use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status, always "ok" while the process serves requests.
    pub status: String,
    /// Topics referenced since startup.
    pub topics: usize,
    /// Topics currently advertised as live.
    pub live: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(topics: usize, live: usize) -> Self {
        Self {
            status: "ok".to_string(),
            topics,
            live,
        }
    }
}
