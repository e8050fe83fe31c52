use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::access::assert_participant;
use crate::error::ChatError;
use crate::models::{Chat, ChatSummary, ChatType, Participant};
use crate::store::ChatStore;

pub struct ChatDirectory {
    store: Arc<dyn ChatStore>,
}

impl ChatDirectory {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Chats `caller` belongs to, most recently active first. Chats without messages
    /// rank by creation time; equal times fall back to the chat id.
    pub async fn list_chats(&self, caller: &str) -> Result<Vec<ChatSummary>, ChatError> {
        let mut chats = self.store.chats_for_user(caller).await?;
        chats.sort_by(|a, b| {
            b.activity_at()
                .cmp(&a.activity_at())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(chats.iter().map(Chat::summary).collect())
    }

    /// Creates a chat and returns its id. A Direct chat for a pair that already has one
    /// returns the existing id instead.
    pub async fn create_chat(
        &self,
        caller: &str,
        name: &str,
        participants: Vec<String>,
        chat_type: ChatType,
    ) -> Result<String, ChatError> {
        let members = normalize_members(caller, participants)?;

        if chat_type == ChatType::Direct {
            if members.len() != 2 {
                return Err(ChatError::Validation(
                    "Direct chats must have exactly 2 participants".to_string(),
                ));
            }
            if let Some(existing) = self
                .store
                .find_direct_chat(&members[0], &members[1])
                .await?
            {
                info!("Direct chat {existing} already exists for {members:?}");
                return Ok(existing);
            }
        }

        for member in &members {
            if self.store.user(member).await?.is_none() {
                return Err(ChatError::NotFound(format!("User {member}")));
            }
        }

        let chat = Chat::new(name.to_string(), chat_type, &members, Utc::now())?;
        let id = self.store.insert_chat(chat).await?;
        info!("Chat {id} ready for {members:?}");
        Ok(id)
    }

    /// Participants in join order. Only members may look.
    pub async fn get_participants(
        &self,
        caller: &str,
        chat: &str,
    ) -> Result<Vec<Participant>, ChatError> {
        assert_participant(self.store.as_ref(), chat, caller).await?;
        let mut participants = self.store.participants(chat).await?;
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }
}

/// Trims ids, drops blanks and duplicates (first occurrence wins), and appends the caller
/// if they are not already listed.
fn normalize_members(caller: &str, participants: Vec<String>) -> Result<Vec<String>, ChatError> {
    let mut members: Vec<String> = Vec::with_capacity(participants.len() + 1);
    for user in participants {
        let user = user.trim();
        if !user.is_empty() && !members.iter().any(|m| m == user) {
            members.push(user.to_string());
        }
    }
    if !members.iter().any(|m| m == caller) {
        members.push(caller.to_string());
    }
    if members.is_empty() {
        return Err(ChatError::Validation("No participants given".to_string()));
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageType, NewMessage, User};
    use crate::store::MemoryStore;

    async fn directory_with_users(names: &[&str]) -> (ChatDirectory, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for name in names {
            store
                .insert_user(User {
                    name: (*name).to_string(),
                    full_name: (*name).to_string(),
                    email: (*name).to_string(),
                    enabled: true,
                    password_hash: String::new(),
                    api_key: None,
                    api_secret_hash: None,
                })
                .await
                .unwrap();
        }
        (ChatDirectory::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_direct_chat_is_idempotent_and_symmetric() {
        let (directory, _) = directory_with_users(&["a", "b"]).await;

        let first = directory
            .create_chat("a", "ab", vec!["b".into()], ChatType::Direct)
            .await
            .unwrap();
        let again = directory
            .create_chat("a", "ab", vec!["a".into(), "b".into()], ChatType::Direct)
            .await
            .unwrap();
        let reversed = directory
            .create_chat("b", "ba", vec!["a".into()], ChatType::Direct)
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(first, reversed);
        assert_eq!(directory.list_chats("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_chat_needs_exactly_two() {
        let (directory, _) = directory_with_users(&["a", "b", "c"]).await;

        for others in [vec![], vec!["a".to_string()], vec!["b".into(), "c".into()]] {
            let result = directory
                .create_chat("a", "dm", others, ChatType::Direct)
                .await;
            assert!(matches!(result, Err(ChatError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_group_sharing_pair_does_not_satisfy_direct_dedup() {
        let (directory, _) = directory_with_users(&["a", "b"]).await;

        let group = directory
            .create_chat("a", "team", vec!["b".into()], ChatType::Group)
            .await
            .unwrap();
        let direct = directory
            .create_chat("a", "dm", vec!["b".into()], ChatType::Direct)
            .await
            .unwrap();
        assert_ne!(group, direct);
    }

    #[tokio::test]
    async fn test_unknown_participant() {
        let (directory, _) = directory_with_users(&["a"]).await;
        let result = directory
            .create_chat("a", "dm", vec!["ghost".into()], ChatType::Direct)
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_orders_by_latest_activity() {
        let (directory, store) = directory_with_users(&["a", "b", "c"]).await;

        let ab = directory
            .create_chat("a", "ab", vec!["b".into()], ChatType::Direct)
            .await
            .unwrap();
        let ac = directory
            .create_chat("a", "ac", vec!["c".into()], ChatType::Direct)
            .await
            .unwrap();

        store
            .append_message(NewMessage {
                chat: ab.clone(),
                sender: "b".into(),
                content: "x".repeat(120),
                message_type: MessageType::Text,
            })
            .await
            .unwrap();

        let chats = directory.list_chats("a").await.unwrap();
        assert_eq!(chats[0].name, ab);
        assert_eq!(chats[1].name, ac);
        assert_eq!(chats[0].last_message.as_ref().unwrap().len(), 100);
        assert!(directory.list_chats("b").await.unwrap().iter().all(|c| c.name != ac));
    }

    #[tokio::test]
    async fn test_participants_require_membership() {
        let (directory, _) = directory_with_users(&["a", "b", "c"]).await;
        let id = directory
            .create_chat("a", "ab", vec!["b".into()], ChatType::Direct)
            .await
            .unwrap();

        let participants = directory.get_participants("b", &id).await.unwrap();
        let users: Vec<_> = participants.iter().map(|p| p.user.as_str()).collect();
        assert_eq!(users, vec!["b", "a"]);
        assert!(matches!(
            directory.get_participants("c", &id).await,
            Err(ChatError::AccessDenied)
        ));
    }
}
