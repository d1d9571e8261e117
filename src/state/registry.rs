//! Plain bookkeeping run inside the critical section of [`RelayHub`](super::RelayHub).
//!
//! Nothing here blocks or performs I/O; every method returns immediately.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
};

use bytes::Bytes;
use tokio::{fs::File, sync::mpsc};
use uuid::Uuid;

use super::topic::TopicKey;

/// Identifier of one attached subscriber, unique for the process lifetime.
pub type SubscriberId = Uuid;

/// Archive file shared between the registry and the publish that owns it.
pub type SharedFile = Arc<tokio::sync::Mutex<File>>;

/// Unit of fan-out delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes read from the publisher, never longer than the configured chunk size.
    Data(Bytes),
    /// The publisher finished cleanly; no further chunks follow.
    End,
}

impl Chunk {
    /// Copy of this chunk backed by its own buffer, so no two subscribers share one.
    pub fn detached(&self) -> Chunk {
        match self {
            Chunk::Data(bytes) => Chunk::Data(Bytes::copy_from_slice(bytes)),
            Chunk::End => Chunk::End,
        }
    }
}

#[derive(Default)]
pub(crate) struct TopicEntry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Chunk>>,
    content_type: Option<String>,
}

/// Live archive registered for a topic.
pub(crate) struct ArchiveSlot {
    pub owner: Uuid,
    pub path: PathBuf,
    pub file: SharedFile,
}

#[derive(Default)]
pub(crate) struct Registry {
    topics: HashMap<TopicKey, TopicEntry>,
    advertisements: HashMap<TopicKey, usize>,
    archives: HashMap<TopicKey, ArchiveSlot>,
}

impl Registry {
    /// Entries are created on first use and kept once emptied.
    pub fn ensure_topic(&mut self, topic: &TopicKey) -> &mut TopicEntry {
        self.topics.entry(topic.clone()).or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn insert_subscriber(
        &mut self,
        topic: &TopicKey,
        id: SubscriberId,
        sender: mpsc::Sender<Chunk>,
    ) {
        self.ensure_topic(topic).subscribers.insert(id, sender);
    }

    pub fn remove_subscriber(&mut self, topic: &TopicKey, id: SubscriberId) -> bool {
        self.topics
            .get_mut(topic)
            .is_some_and(|entry| entry.subscribers.remove(&id).is_some())
    }

    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Clone the current senders so delivery can happen after the lock is released.
    pub fn senders(&self, topic: &TopicKey) -> Vec<(SubscriberId, mpsc::Sender<Chunk>)> {
        self.topics
            .get(topic)
            .map(|entry| {
                entry
                    .subscribers
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_content_type(&mut self, topic: &TopicKey, content_type: String) {
        self.ensure_topic(topic).content_type = Some(content_type);
    }

    pub fn content_type(&self, topic: &TopicKey) -> Option<String> {
        self.topics
            .get(topic)
            .and_then(|entry| entry.content_type.clone())
    }

    pub fn advertise(&mut self, topic: &TopicKey) {
        *self.advertisements.entry(topic.clone()).or_insert(0) += 1;
    }

    /// Drop one advertisement reference, removing the key once the last holder is gone.
    pub fn withdraw(&mut self, topic: &TopicKey) {
        if let Some(count) = self.advertisements.get_mut(topic) {
            *count -= 1;
            if *count == 0 {
                self.advertisements.remove(topic);
            }
        }
    }

    pub fn advertised(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .advertisements
            .keys()
            .map(|topic| topic.display_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn has_archive(&self, topic: &TopicKey) -> bool {
        self.archives.contains_key(topic)
    }

    /// Whether `path` is the file of some live archive.
    pub fn is_recording(&self, path: &std::path::Path) -> bool {
        self.archives.values().any(|slot| slot.path == path)
    }

    /// Register `slot` unless the topic already has a live archive, in which case
    /// the slot is handed back untouched.
    pub fn insert_archive(
        &mut self,
        topic: &TopicKey,
        slot: ArchiveSlot,
    ) -> Result<(), ArchiveSlot> {
        if self.archives.contains_key(topic) {
            return Err(slot);
        }
        self.archives.insert(topic.clone(), slot);
        Ok(())
    }

    /// Remove the topic's archive only when `owner` is the publish that opened it.
    pub fn remove_archive(&mut self, topic: &TopicKey, owner: Uuid) -> Option<ArchiveSlot> {
        match self.archives.get(topic) {
            Some(slot) if slot.owner == owner => self.archives.remove(topic),
            _ => None,
        }
    }

    /// File names of archives still being written.
    pub fn active_archive_names(&self) -> HashSet<String> {
        self.archives
            .values()
            .filter_map(|slot| slot.path.file_name())
            .filter_map(|name| name.to_str())
            .map(str::to_string)
            .collect()
    }
}
