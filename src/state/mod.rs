pub mod chat;
mod hub;
mod registry;
mod topic;

use std::sync::Arc;

use crate::{config::AppConfig, services::archive::ArchiveDirectory};

pub use self::chat::{ChatHub, ChatMessage};
pub use self::hub::{Advertisement, ArchiveLease, RelayHub, Subscription};
pub use self::registry::{Chunk, SubscriberId};
pub use self::topic::TopicKey;

pub type SharedState = Arc<AppState>;

const CHAT_CAPACITY: usize = 64;

/// Central application state: the relay hub, the archive directory and the chat room.
pub struct AppState {
    config: AppConfig,
    hub: RelayHub,
    archives: ArchiveDirectory,
    chat: ChatHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig) -> SharedState {
        let hub = RelayHub::new(config.hub.clone());
        let archives = ArchiveDirectory::new(config.archive_dir.clone());
        Arc::new(Self {
            config,
            hub,
            archives,
            chat: ChatHub::new(CHAT_CAPACITY),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Broadcast hub shared by every publisher and subscriber.
    pub fn hub(&self) -> &RelayHub {
        &self.hub
    }

    /// Filesystem view of the archive root.
    pub fn archives(&self) -> &ArchiveDirectory {
        &self.archives
    }

    pub fn chat(&self) -> &ChatHub {
        &self.chat
    }
}
