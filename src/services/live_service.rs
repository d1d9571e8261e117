use crate::{dto::live::LiveBroadcastsResponse, state::SharedState};

/// Topics whose publishers opted into the public listing.
pub fn live_broadcasts(state: &SharedState) -> LiveBroadcastsResponse {
    LiveBroadcastsResponse {
        broadcasts: state.hub().advertised(),
    }
}
