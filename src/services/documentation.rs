use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the relay.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::live::live_broadcasts,
        crate::routes::archive::list_archived,
        crate::routes::archive::archive_action,
        crate::routes::chat::ws_handler,
        crate::routes::topic::subscribe,
        crate::routes::topic::publish,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::live::LiveBroadcastsResponse,
            crate::dto::archive::ArchivedFileResponse,
            crate::dto::archive::ArchiveListResponse,
            crate::dto::archive::ArchiveAction,
            crate::dto::archive::ArchiveActionForm,
            crate::dto::archive::ArchiveActionResponse,
            crate::dto::chat::ChatOutbound,
            crate::dto::publish::PublishSummary,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "relay", description = "Live publish and subscribe"),
        (name = "archive", description = "Archived broadcasts"),
        (name = "chat", description = "WebSocket chat room"),
    )
)]
pub struct ApiDoc;
