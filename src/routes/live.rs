use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::live::LiveBroadcastsResponse, services::live_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/live",
    tag = "relay",
    responses((status = 200, description = "Advertised live broadcasts", body = LiveBroadcastsResponse))
)]
/// List topics currently advertised by their publishers.
pub async fn live_broadcasts(State(state): State<SharedState>) -> Json<LiveBroadcastsResponse> {
    Json(live_service::live_broadcasts(&state))
}

/// The landing page doubles as the live listing.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(live_broadcasts))
        .route("/live", get(live_broadcasts))
}
