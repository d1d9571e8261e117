//! Typed view of the query flags accepted on publish and subscribe requests.

use serde::Serialize;
use utoipa::ToSchema;

/// Options resolved once per publish request.
///
/// Only the exact value `true` enables a flag. Missing, repeated-later,
/// misspelled or otherwise malformed values leave it off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Start reading the body immediately instead of waiting for a listener.
    pub stream: bool,
    /// Persist the stream under the archive root.
    pub archive: bool,
    /// List the topic as a live broadcast while the publish runs.
    pub advertise: bool,
}

impl PublishOptions {
    /// Resolve the options from decoded query pairs, first occurrence winning.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            stream: flag(pairs, "stream"),
            archive: flag(pairs, "archive"),
            advertise: flag(pairs, "advertise"),
        }
    }

    /// Advertising only applies to publishes that stream right away.
    pub fn advertised(&self) -> bool {
        self.advertise && self.stream
    }
}

fn flag(pairs: &[(String, String)], name: &str) -> bool {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .is_some_and(|(_, value)| value == "true")
}

/// Summary returned to the publisher once its request ends.
#[derive(Debug, Serialize, ToSchema)]
pub struct PublishSummary {
    /// `completed`, `truncated` or `abandoned`.
    pub outcome: String,
    /// Number of chunks fanned out.
    pub chunks: u64,
    /// Number of body bytes consumed.
    pub bytes: u64,
}
