use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::chat::ChatOutbound,
    state::{ChatMessage, SharedState},
};

/// Longest chat line relayed; longer lines are dropped.
const MAX_LINE_LEN: usize = 1024;

/// Handle the full lifecycle of one chat socket.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let mut room = BroadcastStream::new(state.chat().subscribe());
    info!(
        participant = %id,
        participants = state.chat().participants(),
        "chat socket connected"
    );

    // Dedicated writer task keeps room messages flowing even while we await inbound frames.
    let mut writer_task = tokio::spawn(async move {
        while let Some(item) = room.next().await {
            let message = match item {
                Ok(message) => message,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!(participant = %id, skipped, "chat socket lagged");
                    continue;
                }
            };
            let Ok(payload) = serde_json::to_string(&ChatOutbound::from(message)) else {
                continue;
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer_task => break,
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let text = text.trim();
                    if text.is_empty() || text.len() > MAX_LINE_LEN {
                        continue;
                    }
                    state.chat().broadcast(ChatMessage {
                        from: id,
                        text: text.to_string(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(participant = %id, error = %err, "chat socket receive error");
                    break;
                }
            },
        }
    }

    writer_task.abort();
    info!(participant = %id, "chat socket disconnected");
}
