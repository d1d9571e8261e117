use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{fs::File, io::AsyncWriteExt, sync::mpsc, time::timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HubConfig;

use super::{
    registry::{ArchiveSlot, Chunk, Registry, SharedFile, SubscriberId},
    topic::TopicKey,
};

/// In-process broadcast engine relaying one publisher per topic to many subscribers.
///
/// All registries live behind a single mutex. Critical sections only touch the
/// maps; channel sends and file writes always happen after the guard is released,
/// on snapshots taken inside it.
#[derive(Clone)]
pub struct RelayHub {
    registry: Arc<Mutex<Registry>>,
    config: Arc<HubConfig>,
}

impl RelayHub {
    /// Create an empty hub with the given tunables.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Make sure the topic has a subscriber set, creating an empty one if needed.
    pub fn touch(&self, topic: &TopicKey) {
        self.registry.lock().ensure_topic(topic);
    }

    /// Attach a new subscriber to `topic` with its own bounded channel.
    ///
    /// The returned handle deregisters itself when dropped.
    pub fn subscribe(&self, topic: &TopicKey) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity);
        let id = Uuid::new_v4();
        self.registry.lock().insert_subscriber(topic, id, sender);
        debug!(topic = %topic, subscriber = %id, "added listener");
        Subscription {
            hub: self.clone(),
            topic: topic.clone(),
            id,
            receiver,
        }
    }

    /// Number of subscribers currently attached to `topic`.
    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.registry.lock().subscriber_count(topic)
    }

    /// Number of topics ever referenced, including emptied ones.
    pub fn topic_count(&self) -> usize {
        self.registry.lock().topic_count()
    }

    /// Push a private copy of `chunk` to every subscriber attached when the call starts.
    ///
    /// Sends are sequential and wait for channel capacity, so a full subscriber
    /// holds back the rest of the topic. With a stall timeout configured, a
    /// subscriber that cannot accept the chunk in time is evicted instead.
    /// Returns how many subscribers accepted the chunk.
    pub async fn broadcast(&self, topic: &TopicKey, chunk: Chunk) -> usize {
        let targets = self.registry.lock().senders(topic);
        let mut delivered = 0;

        for (id, sender) in targets {
            let accepted = match self.config.stall_timeout {
                None => sender.send(chunk.detached()).await.is_ok(),
                Some(limit) => match timeout(limit, sender.send(chunk.detached())).await {
                    Ok(result) => result.is_ok(),
                    Err(_) => {
                        warn!(
                            topic = %topic,
                            subscriber = %id,
                            timeout_ms = limit.as_millis() as u64,
                            "subscriber stalled; evicting"
                        );
                        self.evict(topic, id);
                        false
                    }
                },
            };
            if accepted {
                delivered += 1;
            }
        }

        delivered
    }

    /// Record the content type decided for the topic's current publish.
    pub fn set_content_type(&self, topic: &TopicKey, content_type: String) {
        debug!(topic = %topic, content_type = %content_type, "content type decided");
        self.registry.lock().set_content_type(topic, content_type);
    }

    pub fn content_type(&self, topic: &TopicKey) -> Option<String> {
        self.registry.lock().content_type(topic)
    }

    /// List `topic` as a live broadcast until the returned guard is dropped.
    pub fn advertise(&self, topic: &TopicKey) -> Advertisement {
        self.registry.lock().advertise(topic);
        debug!(topic = %topic, "advertised");
        Advertisement {
            hub: self.clone(),
            topic: topic.clone(),
        }
    }

    /// Currently advertised topics without their leading slash, sorted.
    pub fn advertised(&self) -> Vec<String> {
        self.registry.lock().advertised()
    }

    pub fn has_archive(&self, topic: &TopicKey) -> bool {
        self.registry.lock().has_archive(topic)
    }

    /// Whether `path` is still being written by a live archive.
    pub fn is_recording(&self, path: &Path) -> bool {
        self.registry.lock().is_recording(path)
    }

    /// Register `file` as the live archive of `topic`.
    ///
    /// Returns `None`, dropping the file, when the topic already has one.
    pub fn install_archive(
        &self,
        topic: &TopicKey,
        path: PathBuf,
        file: File,
    ) -> Option<ArchiveLease> {
        let owner = Uuid::new_v4();
        let file: SharedFile = Arc::new(tokio::sync::Mutex::new(file));
        let slot = ArchiveSlot {
            owner,
            path: path.clone(),
            file: file.clone(),
        };

        let inserted = self.registry.lock().insert_archive(topic, slot);
        match inserted {
            Ok(()) => {
                debug!(topic = %topic, path = %path.display(), "opened archive");
                Some(ArchiveLease {
                    hub: self.clone(),
                    topic: topic.clone(),
                    owner,
                    path,
                    file,
                })
            }
            Err(_rejected) => None,
        }
    }

    /// File names of archives still being written.
    pub fn active_archive_names(&self) -> HashSet<String> {
        self.registry.lock().active_archive_names()
    }

    fn evict(&self, topic: &TopicKey, id: SubscriberId) {
        self.registry.lock().remove_subscriber(topic, id);
    }
}

/// Receiving end of one subscriber, registered in the hub for its whole lifetime.
pub struct Subscription {
    hub: RelayHub,
    topic: TopicKey,
    id: SubscriberId,
    receiver: mpsc::Receiver<Chunk>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Wait for the next data chunk.
    ///
    /// Yields `None` once the publisher signals the end of the stream or the hub
    /// drops this subscriber.
    pub async fn next_data(&mut self) -> Option<Bytes> {
        match self.receiver.recv().await {
            Some(Chunk::Data(bytes)) => Some(bytes),
            Some(Chunk::End) | None => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let removed = self.hub.registry.lock().remove_subscriber(&self.topic, self.id);
        self.receiver.close();
        if removed {
            debug!(topic = %self.topic, subscriber = %self.id, "removed listener");
        }
    }
}

/// Scoped advertisement entry; the topic leaves the live listing on drop.
pub struct Advertisement {
    hub: RelayHub,
    topic: TopicKey,
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        self.hub.registry.lock().withdraw(&self.topic);
        debug!(topic = %self.topic, "advertisement withdrawn");
    }
}

/// Exclusive right to write the live archive of one topic.
///
/// Dropping the lease unregisters the archive and closes the file.
pub struct ArchiveLease {
    hub: RelayHub,
    topic: TopicKey,
    owner: Uuid,
    path: PathBuf,
    file: SharedFile,
}

impl ArchiveLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `bytes` to the archive file.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.file.lock().await.write_all(bytes).await
    }

    /// Flush pending writes, then release the archive.
    pub async fn close(self) {
        if let Err(err) = self.file.lock().await.flush().await {
            warn!(topic = %self.topic, error = %err, "failed to flush archive");
        }
    }
}

impl Drop for ArchiveLease {
    fn drop(&mut self) {
        let slot = self.hub.registry.lock().remove_archive(&self.topic, self.owner);
        if slot.is_some() {
            debug!(topic = %self.topic, path = %self.path.display(), "closed archive");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn topic(path: &str) -> TopicKey {
        TopicKey::from_path(path)
    }

    fn hub_with(capacity: usize, stall_timeout: Option<Duration>) -> RelayHub {
        RelayHub::new(HubConfig {
            channel_capacity: capacity,
            stall_timeout,
            ..HubConfig::default()
        })
    }

    fn data(bytes: &'static [u8]) -> Chunk {
        Chunk::Data(Bytes::from_static(bytes))
    }

    #[tokio::test]
    async fn subscription_deregisters_on_drop() {
        let hub = RelayHub::new(HubConfig::default());
        let first = hub.subscribe(&topic("/a.mp3"));
        let second = hub.subscribe(&topic("/a.mp3"));
        assert_ne!(first.id(), second.id());
        assert_eq!(hub.subscriber_count(&topic("/a.mp3")), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(&topic("/a.mp3")), 1);
        drop(second);
        assert_eq!(hub.subscriber_count(&topic("/a.mp3")), 0);
        assert_eq!(hub.topic_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_in_order() {
        let hub = RelayHub::new(HubConfig::default());
        let mut first = hub.subscribe(&topic("/a.mp3"));
        let mut second = hub.subscribe(&topic("/a.mp3"));
        let mut other = hub.subscribe(&topic("/b.mp3"));

        assert_eq!(hub.broadcast(&topic("/a.mp3"), data(b"one")).await, 2);
        assert_eq!(hub.broadcast(&topic("/a.mp3"), data(b"two")).await, 2);
        assert_eq!(hub.broadcast(&topic("/a.mp3"), Chunk::End).await, 2);

        for subscription in [&mut first, &mut second] {
            assert_eq!(subscription.next_data().await.as_deref(), Some(&b"one"[..]));
            assert_eq!(subscription.next_data().await.as_deref(), Some(&b"two"[..]));
            assert_eq!(subscription.next_data().await, None);
        }
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_broadcast() {
        let hub = hub_with(1, None);
        let mut alive = hub.subscribe(&topic("/a.mp3"));
        let gone = hub.subscribe(&topic("/a.mp3"));
        drop(gone);

        assert_eq!(hub.broadcast(&topic("/a.mp3"), data(b"x")).await, 1);
        assert_eq!(alive.next_data().await.as_deref(), Some(&b"x"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn full_subscriber_blocks_without_stall_timeout() {
        let hub = hub_with(1, None);
        let _slow = hub.subscribe(&topic("/a.mp3"));

        hub.broadcast(&topic("/a.mp3"), data(b"fills")).await;
        let blocked = timeout(
            Duration::from_secs(60),
            hub.broadcast(&topic("/a.mp3"), data(b"waits")),
        )
        .await;

        assert!(blocked.is_err());
        assert_eq!(hub.subscriber_count(&topic("/a.mp3")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_is_evicted_after_timeout() {
        let hub = hub_with(1, Some(Duration::from_millis(200)));
        let mut slow = hub.subscribe(&topic("/a.mp3"));
        let mut fast = hub.subscribe(&topic("/a.mp3"));

        hub.broadcast(&topic("/a.mp3"), data(b"one")).await;
        assert_eq!(fast.next_data().await.as_deref(), Some(&b"one"[..]));

        // `slow` still holds "one", so only `fast` can take "two".
        assert_eq!(hub.broadcast(&topic("/a.mp3"), data(b"two")).await, 1);
        assert_eq!(hub.subscriber_count(&topic("/a.mp3")), 1);
        assert_eq!(fast.next_data().await.as_deref(), Some(&b"two"[..]));

        assert_eq!(slow.next_data().await.as_deref(), Some(&b"one"[..]));
        assert_eq!(slow.next_data().await, None);
    }

    #[tokio::test]
    async fn advertisement_is_scoped_to_guard() {
        let hub = RelayHub::new(HubConfig::default());
        let guard = hub.advertise(&topic("/show.mp3"));
        assert_eq!(hub.advertised(), vec!["show.mp3".to_string()]);

        drop(guard);
        assert!(hub.advertised().is_empty());
    }

    #[tokio::test]
    async fn archive_lease_is_exclusive_and_released_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let hub = RelayHub::new(HubConfig::default());
        let path = dir.path().join("show.mp3");

        let lease = hub
            .install_archive(
                &topic("/show.mp3"),
                path.clone(),
                File::create(&path).await.unwrap(),
            )
            .unwrap();
        let other_path = dir.path().join("other.mp3");
        let rejected = hub.install_archive(
            &topic("/show.mp3"),
            other_path.clone(),
            File::create(&other_path).await.unwrap(),
        );
        assert!(rejected.is_none());
        assert!(hub.has_archive(&topic("/show.mp3")));
        assert_eq!(
            hub.active_archive_names(),
            HashSet::from(["show.mp3".to_string()])
        );

        lease.write(b"abc").await.unwrap();
        lease.write(b"def").await.unwrap();
        lease.close().await;

        assert!(!hub.has_archive(&topic("/show.mp3")));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }
}
