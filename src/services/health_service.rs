use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness together with a couple of hub counters.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let hub = state.hub();
    HealthResponse::ok(hub.topic_count(), hub.advertised().len())
}
