use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Chat, ChatType, Message, MessageQuery, NewMessage, Participant, User};

/// Document store the chat core persists through.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Inserts a chat with its participants. For a Direct chat whose pair already has
    /// one, nothing is written and the existing id is returned.
    async fn insert_chat(&self, chat: Chat) -> Result<String, StoreError>;

    async fn find_direct_chat(&self, a: &str, b: &str) -> Result<Option<String>, StoreError>;

    async fn chats_for_user(&self, user: &str) -> Result<Vec<Chat>, StoreError>;

    async fn participants(&self, chat: &str) -> Result<Vec<Participant>, StoreError>;

    async fn is_participant(&self, chat: &str, user: &str) -> Result<bool, StoreError>;

    /// Stamps and stores the message and updates the chat's last-message summary as one
    /// unit: either both land or neither does.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Messages in ascending creation order, `creation > after`, at most `limit`.
    async fn messages(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError>;

    /// Flags every unread message not sent by `reader` as read and returns how many
    /// changed. When any did, the reader's `last_read_at` moves to the newest of them.
    async fn mark_read(&self, chat: &str, reader: &str) -> Result<usize, StoreError>;

    async fn insert_user(&self, user: User) -> Result<(), StoreError>;

    async fn update_user(&self, user: User) -> Result<(), StoreError>;

    async fn user(&self, name: &str) -> Result<Option<User>, StoreError>;

    async fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError>;

    /// All users ordered by name.
    async fn users(&self) -> Result<Vec<User>, StoreError>;
}

#[derive(Default)]
struct Tables {
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Vec<Message>>,
    users: BTreeMap<String, User>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Tables {
    /// Creation times never repeat: a clock tie or step backwards is bumped by 1µs.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn direct_chat(&self, a: &str, b: &str) -> Option<&Chat> {
        self.chats.values().find(|chat| chat.is_direct_between(a, b))
    }
}

/// In-process store backed by maps behind one `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_chat(&self, chat: Chat) -> Result<String, StoreError> {
        let mut tables = self.tables.write().await;

        if chat.chat_type == ChatType::Direct {
            if let [a, b] = chat.participants() {
                if let Some(existing) = tables.direct_chat(&a.user, &b.user) {
                    return Ok(existing.id.clone());
                }
            }
        }
        if tables.chats.contains_key(&chat.id) {
            return Err(StoreError::Conflict(format!("Chat {}", chat.id)));
        }

        let id = chat.id.clone();
        tables.messages.insert(id.clone(), Vec::new());
        tables.chats.insert(id.clone(), chat);
        Ok(id)
    }

    async fn find_direct_chat(&self, a: &str, b: &str) -> Result<Option<String>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.direct_chat(a, b).map(|chat| chat.id.clone()))
    }

    async fn chats_for_user(&self, user: &str) -> Result<Vec<Chat>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .chats
            .values()
            .filter(|chat| chat.has_participant(user))
            .cloned()
            .collect())
    }

    async fn participants(&self, chat: &str) -> Result<Vec<Participant>, StoreError> {
        let tables = self.tables.read().await;
        tables
            .chats
            .get(chat)
            .map(|chat| chat.participants().to_vec())
            .ok_or_else(|| StoreError::Missing(format!("Chat {chat}")))
    }

    async fn is_participant(&self, chat: &str, user: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .chats
            .get(chat)
            .is_some_and(|chat| chat.has_participant(user)))
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.chats.contains_key(&message.chat) {
            return Err(StoreError::Missing(format!("Chat {}", message.chat)));
        }

        let creation = tables.next_stamp();
        let message = message.into_message(creation);

        if let Some(chat) = tables.chats.get_mut(&message.chat) {
            chat.record_last_message(&message.content, creation);
        }
        tables
            .messages
            .entry(message.chat.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn messages(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let Some(log) = tables.messages.get(&query.chat) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .filter(|m| query.after.map_or(true, |after| m.creation > after))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, chat: &str, reader: &str) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;

        let mut changed = 0;
        let mut newest = None;
        if let Some(log) = tables.messages.get_mut(chat) {
            for message in log.iter_mut().filter(|m| m.sender != reader && !m.is_read) {
                message.is_read = true;
                changed += 1;
                newest = newest.max(Some(message.creation));
            }
        }

        if let Some(read_up_to) = newest {
            if let Some(participant) = tables
                .chats
                .get_mut(chat)
                .and_then(|chat| chat.participant_mut(reader))
            {
                participant.last_read_at = participant.last_read_at.max(Some(read_up_to));
            }
        }
        Ok(changed)
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.name) {
            return Err(StoreError::Conflict(format!("User {}", user.name)));
        }
        tables.users.insert(user.name.clone(), user);
        Ok(())
    }

    async fn update_user(&self, user: User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&user.name) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(StoreError::Missing(format!("User {}", user.name))),
        }
    }

    async fn user(&self, name: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(name).cloned())
    }

    async fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().cloned().collect())
    }
}
