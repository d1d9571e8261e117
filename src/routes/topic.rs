use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::Response,
    routing::get,
};

use crate::{
    dto::publish::{PublishOptions, PublishSummary},
    services::{publisher, subscriber},
    state::{SharedState, TopicKey},
};

/// Catch-all relay endpoint; any path not claimed by another router is a topic.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/{*topic}",
            get(subscribe).post(publish).fallback(acknowledge),
        )
        .layer(DefaultBodyLimit::disable())
}

#[utoipa::path(
    get,
    path = "/{topic}",
    tag = "relay",
    params(("topic" = String, Path, description = "Topic path, e.g. `show1.mp3`")),
    responses((status = 200, description = "Live chunked stream of the topic", content_type = "application/octet-stream", body = String))
)]
/// Attach as a subscriber and receive the topic's bytes as they arrive.
pub async fn subscribe(State(state): State<SharedState>, Path(topic): Path<String>) -> Response {
    subscriber::attach(state.hub(), TopicKey::from_path(&topic)).await
}

#[utoipa::path(
    post,
    path = "/{topic}",
    tag = "relay",
    params(
        ("topic" = String, Path, description = "Topic path, e.g. `show1.mp3`"),
        ("stream" = Option<bool>, Query, description = "Start reading immediately instead of waiting for a listener"),
        ("archive" = Option<bool>, Query, description = "Persist the stream under the archive root"),
        ("advertise" = Option<bool>, Query, description = "List the topic as live (requires stream=true)")
    ),
    responses((status = 200, description = "Publish finished", body = PublishSummary))
)]
/// Publish the request body as the topic's live stream.
///
/// Unparsable query strings are treated as if every flag were off.
pub async fn publish(
    State(state): State<SharedState>,
    Path(topic): Path<String>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    body: Body,
) -> Json<PublishSummary> {
    let options = query
        .map(|Query(pairs)| PublishOptions::from_pairs(&pairs))
        .unwrap_or_default();
    let outcome = publisher::publish(
        state.hub(),
        state.archives(),
        &TopicKey::from_path(&topic),
        options,
        body.into_data_stream(),
    )
    .await;

    Json(PublishSummary {
        outcome: outcome.end.as_str().to_string(),
        chunks: outcome.chunks,
        bytes: outcome.bytes,
    })
}

/// Other methods on a topic are accepted and ignored.
async fn acknowledge() -> StatusCode {
    StatusCode::OK
}
