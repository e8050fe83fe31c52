use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message as WsMessage;

use crate::error::PublishError;
use crate::messages::ServerEvent;
use crate::models::Message;
use crate::store::ChatStore;

/// Best-effort pub/sub addressed by user identity. No delivery confirmation.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, user: &str, event: &ServerEvent) -> Result<(), PublishError>;
}

type Sessions = HashMap<String, mpsc::UnboundedSender<WsMessage>>;

/// Live websocket sessions keyed by user, then by session id.
#[derive(Default)]
pub struct Hub {
    users: RwLock<HashMap<String, Sessions>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user: &str, tx: mpsc::UnboundedSender<WsMessage>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut users = self.users.write().await;
        users
            .entry(user.to_string())
            .or_default()
            .insert(session_id.clone(), tx);
        session_id
    }

    pub async fn unregister(&self, user: &str, session_id: &str) {
        let mut users = self.users.write().await;
        if let Some(sessions) = users.get_mut(user) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                users.remove(user);
            }
        }
    }

    pub async fn session_count(&self, user: &str) -> usize {
        let users = self.users.read().await;
        users.get(user).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl Publisher for Hub {
    async fn publish(&self, user: &str, event: &ServerEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;

        let mut users = self.users.write().await;
        let Some(sessions) = users.get_mut(user) else {
            debug!("{} for {} dropped: no live session", event.name(), user);
            return Ok(());
        };

        sessions.retain(|_, tx| tx.send(WsMessage::text(payload.clone())).is_ok());
        if sessions.is_empty() {
            users.remove(user);
            return Err(PublishError::Closed(user.to_string()));
        }
        Ok(())
    }
}

/// Publishes `new_message` to every participant of the chat except the sender.
/// Failures are logged and never reach the caller.
pub async fn fan_out(store: &dyn ChatStore, publisher: &dyn Publisher, message: &Message) {
    let participants = match store.participants(&message.chat).await {
        Ok(participants) => participants,
        Err(e) => {
            warn!("Fan-out for message {} skipped: {}", message.name, e);
            return;
        }
    };

    let event = ServerEvent::from(message);
    for participant in participants.iter().filter(|p| p.user != message.sender) {
        if let Err(e) = publisher.publish(&participant.user, &event).await {
            warn!(
                "Failed to publish {} to {}: {}",
                event.name(),
                participant.user,
                e
            );
        }
    }
}
