use serde::Serialize;
use utoipa::ToSchema;

/// Topics currently advertised as live broadcasts.
#[derive(Debug, Serialize, ToSchema)]
pub struct LiveBroadcastsResponse {
    /// Topic names without their leading slash, sorted.
    pub broadcasts: Vec<String>,
}
