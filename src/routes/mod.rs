use axum::{Router, http::StatusCode, routing::get};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::state::SharedState;

pub mod archive;
pub mod chat;
pub mod docs;
pub mod health;
pub mod live;
pub mod topic;

/// The complete application: every route plus the cross-cutting middleware layers.
///
/// CORS is fully permissive so browser publishers and players on any origin can connect.
pub fn app(state: SharedState) -> Router<()> {
    router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Compose all route trees, wiring in shared state and documentation routes.
///
/// Fixed routes take precedence over the catch-all topic router.
pub fn router(state: SharedState) -> Router<()> {
    let config = state.config();
    let api_router = health::router()
        .merge(live::router())
        .merge(archive::router(&config.archive_dir))
        .merge(chat::router())
        .merge(topic::router())
        .route("/favicon.ico", get(|| async { StatusCode::OK }))
        .nest_service("/static", ServeDir::new(&config.static_dir));

    api_router.merge(docs::router()).with_state(state)
}
