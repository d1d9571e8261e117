//! Publisher ingestion loop: consume one live upload and fan it out.

use std::{fmt::Display, pin::pin};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dto::publish::PublishOptions,
    services::{archive::ArchiveDirectory, sniff},
    state::{ArchiveLease, Chunk, RelayHub, TopicKey},
};

/// How a publish ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishEnd {
    /// The body ended cleanly and every subscriber received an end-of-stream chunk.
    Completed,
    /// Reading the body failed; subscribers were left without an end signal.
    Truncated,
    /// Nobody subscribed within the activation budget.
    Abandoned,
}

impl PublishEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishEnd::Completed => "completed",
            PublishEnd::Truncated => "truncated",
            PublishEnd::Abandoned => "abandoned",
        }
    }
}

/// Counters reported once a publish is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub end: PublishEnd,
    pub chunks: u64,
    pub bytes: u64,
}

/// Relay `body` to every subscriber of `topic` until it ends.
///
/// Without `options.stream` the body is only read while at least one subscriber
/// is attached; each wait polls the hub once per configured interval and gives
/// up after the configured number of empty polls. Advertisement and archive
/// entries opened here are released on every exit path, including the future
/// being dropped when the publisher disconnects.
pub async fn publish<S, E>(
    hub: &RelayHub,
    archives: &ArchiveDirectory,
    topic: &TopicKey,
    options: PublishOptions,
    body: S,
) -> PublishOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    hub.touch(topic);
    let mut archive = if options.archive {
        open_archive(hub, archives, topic).await
    } else {
        None
    };
    let _advertisement = options.advertised().then(|| hub.advertise(topic));
    info!(
        topic = %topic,
        stream = options.stream,
        archive = archive.is_some(),
        advertise = options.advertised(),
        "publish started"
    );

    let chunk_size = hub.config().chunk_size;
    let mut body = pin!(body);
    let mut chunks = 0u64;
    let mut bytes = 0u64;

    let end = loop {
        if !options.stream && !wait_for_listener(hub, topic).await {
            break PublishEnd::Abandoned;
        }

        let frame = match body.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                warn!(topic = %topic, error = %err, "publisher body ended abruptly");
                break PublishEnd::Truncated;
            }
            None => break PublishEnd::Completed,
        };

        for chunk in split_frame(frame, chunk_size) {
            let failed = match &archive {
                Some(lease) => lease.write(&chunk).await.err(),
                None => None,
            };
            if let Some(err) = failed {
                warn!(topic = %topic, error = %err, "archive write failed; archiving stopped");
                archive = None;
            }

            if chunks == 0 {
                hub.set_content_type(topic, sniff::detect(&chunk, topic));
            }
            chunks += 1;
            bytes += chunk.len() as u64;
            hub.broadcast(topic, Chunk::Data(chunk)).await;
        }
    };

    if end == PublishEnd::Completed {
        let notified = hub.broadcast(topic, Chunk::End).await;
        debug!(topic = %topic, notified, "sent end of stream");
    }
    if let Some(lease) = archive {
        finish_archive(lease, bytes == 0).await;
    }

    info!(
        topic = %topic,
        outcome = end.as_str(),
        chunks,
        bytes,
        "publish ended"
    );
    PublishOutcome { end, chunks, bytes }
}

/// Poll until `topic` has a subscriber; `false` once the poll budget is spent.
async fn wait_for_listener(hub: &RelayHub, topic: &TopicKey) -> bool {
    let config = hub.config();
    let mut empty_polls = 0u32;
    loop {
        if hub.subscriber_count(topic) > 0 {
            return true;
        }
        if empty_polls >= config.activation_max_polls {
            debug!(topic = %topic, empty_polls, "no listener showed up");
            return false;
        }
        if empty_polls == 0 {
            debug!(topic = %topic, "waiting for a listener");
        }
        sleep(config.activation_poll_interval).await;
        empty_polls += 1;
    }
}

/// Open the topic's archive, or log why this publish goes unarchived.
async fn open_archive(
    hub: &RelayHub,
    archives: &ArchiveDirectory,
    topic: &TopicKey,
) -> Option<ArchiveLease> {
    if hub.has_archive(topic) {
        warn!(topic = %topic, "topic is already being archived; not archiving this publish");
        return None;
    }

    let (path, file) = match archives.create(topic).await {
        Ok(created) => created,
        Err(err) => {
            warn!(topic = %topic, error = %err, "failed to create archive; continuing without");
            return None;
        }
    };

    let lease = hub.install_archive(topic, path, file);
    if lease.is_none() {
        warn!(topic = %topic, "archive claimed concurrently; not archiving this publish");
    }
    lease
}

/// Close the archive, deleting it when nothing was ever written.
async fn finish_archive(lease: ArchiveLease, discard: bool) {
    let path = lease.path().to_path_buf();
    lease.close().await;
    if discard {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "discarded empty archive"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to discard empty archive"),
        }
    }
}

/// Cut a body frame into chunks of at most `chunk_size` bytes without copying.
fn split_frame(mut frame: Bytes, chunk_size: usize) -> impl Iterator<Item = Bytes> {
    std::iter::from_fn(move || {
        if frame.is_empty() {
            None
        } else {
            let len = frame.len().min(chunk_size);
            Some(frame.split_to(len))
        }
    })
}
