use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::ChatMessage;

#[derive(Debug, Serialize, ToSchema)]
/// Frame pushed to every chat socket when someone posts a line.
pub struct ChatOutbound {
    pub from: Uuid,
    pub text: String,
}

impl From<ChatMessage> for ChatOutbound {
    fn from(value: ChatMessage) -> Self {
        Self {
            from: value.from,
            text: value.text,
        }
    }
}
