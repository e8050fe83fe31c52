use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::{ChatType, Message, MessageType};

/// Events pushed to connected websocket sessions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "new_message")]
    NewMessage {
        chat: String,
        message: String,
        sender: String,
        content: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new_message",
        }
    }
}

impl From<&Message> for ServerEvent {
    fn from(message: &Message) -> Self {
        ServerEvent::NewMessage {
            chat: message.chat.clone(),
            message: message.name.clone(),
            sender: message.sender.clone(),
            content: message.content.clone(),
        }
    }
}

/// Participants as a JSON list, or as a string holding one (older clients send that).
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ParticipantList {
    List(Vec<String>),
    Encoded(String),
}

impl ParticipantList {
    pub fn into_vec(self) -> Result<Vec<String>, ChatError> {
        match self {
            ParticipantList::List(users) => Ok(users),
            ParticipantList::Encoded(raw) => serde_json::from_str(&raw).map_err(|_| {
                ChatError::Validation("participants must be a list of user ids".to_string())
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateChatRequest {
    pub chat_name: String,
    pub participants: ParticipantList,
    #[serde(default)]
    pub chat_type: ChatType,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreatedChat {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MessagesQuery {
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub name: String,
    pub sender: String,
    pub content: String,
    pub creation: DateTime<Utc>,
}

impl From<Message> for SentMessage {
    fn from(message: Message) -> Self {
        Self {
            name: message.name,
            sender: message.sender,
            content: message.content,
            creation: message.creation,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoginRequest {
    pub usr: String,
    pub pwd: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}
