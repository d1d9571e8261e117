//! Best-effort content-type detection for relayed streams.

use crate::state::TopicKey;

/// Generic binary type, used when neither the bytes nor the topic name tell more.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess the content type of a stream from its first chunk.
///
/// Magic-byte detection wins; when it only yields the generic binary type the
/// topic's file extension is consulted instead.
pub fn detect(chunk: &[u8], topic: &TopicKey) -> String {
    match infer::get(chunk) {
        Some(kind) if kind.mime_type() != OCTET_STREAM => kind.mime_type().to_string(),
        _ => from_extension(topic),
    }
}

fn from_extension(topic: &TopicKey) -> String {
    mime_guess::from_path(topic.as_str())
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}
