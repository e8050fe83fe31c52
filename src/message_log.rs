use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;

use crate::access::assert_participant;
use crate::error::ChatError;
use crate::models::{Message, MessageQuery, MessageType, NewMessage};
use crate::realtime::{fan_out, Publisher};
use crate::store::ChatStore;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Clamps a caller-supplied page size into `1..=MAX_PAGE_SIZE`; missing or
/// non-positive values mean `DEFAULT_PAGE_SIZE`.
pub fn page_size(limit: Option<i64>) -> usize {
    match limit {
        Some(n) if n > 0 => {
            let n = usize::try_from(n).unwrap_or(MAX_PAGE_SIZE);
            n.min(MAX_PAGE_SIZE)
        }
        _ => DEFAULT_PAGE_SIZE,
    }
}

pub struct MessageLog {
    store: Arc<dyn ChatStore>,
    publisher: Arc<dyn Publisher>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn ChatStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn list_messages(
        &self,
        caller: &str,
        chat: &str,
        after: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, ChatError> {
        assert_participant(self.store.as_ref(), chat, caller).await?;
        let query = MessageQuery {
            chat: chat.to_string(),
            after,
            limit: page_size(limit),
        };
        Ok(self.store.messages(&query).await?)
    }

    /// Appends a message, which also refreshes the chat's preview, then notifies the
    /// other participants. The message is committed before fan-out starts.
    pub async fn send_message(
        &self,
        caller: &str,
        chat: &str,
        content: String,
        message_type: MessageType,
    ) -> Result<Message, ChatError> {
        assert_participant(self.store.as_ref(), chat, caller).await?;
        if content.trim().is_empty() {
            return Err(ChatError::Validation(
                "Message content is empty".to_string(),
            ));
        }

        let message = self
            .store
            .append_message(NewMessage {
                chat: chat.to_string(),
                sender: caller.to_string(),
                content,
                message_type,
            })
            .await?;
        debug!("Message {} appended to chat {}", message.name, chat);

        fan_out(&*self.store, &*self.publisher, &message).await;
        Ok(message)
    }

    pub async fn mark_as_read(&self, caller: &str, chat: &str) -> Result<(), ChatError> {
        assert_participant(self.store.as_ref(), chat, caller).await?;
        let changed = self.store.mark_read(chat, caller).await?;
        debug!("{caller} marked {changed} message(s) read in chat {chat}");
        Ok(())
    }
}
