use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Text line posted by one chat socket.
pub struct ChatMessage {
    pub from: Uuid,
    pub text: String,
}

/// Broadcast room shared by every `/ws` connection.
pub struct ChatHub {
    sender: broadcast::Sender<ChatMessage>,
}

impl ChatHub {
    /// Construct a new room backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new participant that will receive subsequent messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.sender.subscribe()
    }

    /// Send a message to all current participants, ignoring delivery errors.
    pub fn broadcast(&self, message: ChatMessage) {
        let _ = self.sender.send(message);
    }

    pub fn participants(&self) -> usize {
        self.sender.receiver_count()
    }
}
