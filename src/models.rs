use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

/// Maximum number of characters kept in a chat's last-message preview.
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatType {
    #[default]
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user: String,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub chat_type: ChatType,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    participants: Vec<Participant>,
}

/// What `get_chats` hands back for each chat the caller belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub name: String,
    pub chat_name: String,
    pub chat_type: ChatType,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Chat {
    /// Builds a chat with one participant row per member. `members` must already be
    /// normalized (distinct, caller included); a Direct chat needs exactly two.
    pub fn new(
        name: String,
        chat_type: ChatType,
        members: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, ChatError> {
        if chat_type == ChatType::Direct && members.len() != 2 {
            return Err(ChatError::Validation(
                "Direct chats must have exactly 2 participants".to_string(),
            ));
        }
        if members.is_empty() {
            return Err(ChatError::Validation(
                "A chat needs at least one participant".to_string(),
            ));
        }

        let participants = members
            .iter()
            .map(|user| Participant {
                user: user.clone(),
                joined_at: now,
                last_read_at: None,
            })
            .collect();

        Ok(Chat {
            id: Uuid::new_v4().to_string(),
            name,
            chat_type,
            last_message: None,
            last_message_at: None,
            created_at: now,
            participants,
        })
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant_mut(&mut self, user: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user == user)
    }

    pub fn has_participant(&self, user: &str) -> bool {
        self.participants.iter().any(|p| p.user == user)
    }

    /// True only for a Direct chat whose participants are exactly `a` and `b`.
    pub fn is_direct_between(&self, a: &str, b: &str) -> bool {
        self.chat_type == ChatType::Direct
            && self.participants.len() == 2
            && self.has_participant(a)
            && self.has_participant(b)
    }

    /// Sort key for chat listings: last activity, falling back to creation time.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn record_last_message(&mut self, content: &str, at: DateTime<Utc>) {
        self.last_message = Some(preview(content));
        self.last_message_at = Some(at);
    }

    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            name: self.id.clone(),
            chat_name: self.name.clone(),
            chat_type: self.chat_type,
            last_message: self.last_message.clone(),
            last_message_at: self.last_message_at,
        }
    }
}

/// First `PREVIEW_CHARS` characters of `content`, no truncation marker.
pub fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub chat: String,
    pub sender: String,
    pub content: String,
    pub message_type: MessageType,
    pub creation: DateTime<Utc>,
    pub is_read: bool,
}

/// A message before the store assigns its id and creation time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat: String,
    pub sender: String,
    pub content: String,
    pub message_type: MessageType,
}

impl NewMessage {
    pub fn into_message(self, creation: DateTime<Utc>) -> Message {
        Message {
            name: Uuid::new_v4().to_string(),
            chat: self.chat,
            sender: self.sender,
            content: self.content,
            message_type: self.message_type,
            creation,
            is_read: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub chat: String,
    pub after: Option<DateTime<Utc>>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct User {
    /// Account identity; the email address it signed up with.
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub enabled: bool,
    pub password_hash: String,
    pub api_key: Option<String>,
    pub api_secret_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub full_name: String,
    pub email: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
        }
    }
}
