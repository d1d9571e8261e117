/// Archive root management and path containment.
pub mod archive;
/// Archive listing and file actions exposed over HTTP.
pub mod archive_service;
/// Chat room WebSocket handling.
pub mod chat_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Platform creation-time lookup.
pub mod file_times;
/// Health check service.
pub mod health_service;
/// Advertised live broadcasts.
pub mod live_service;
/// Publisher ingestion loop.
pub mod publisher;
/// Content-type detection.
pub mod sniff;
/// Subscriber delivery loop.
pub mod subscriber;
