use log::debug;

use crate::error::ChatError;
use crate::store::ChatStore;

/// Fails with `AccessDenied` unless `user` is a participant of `chat`. A chat that does
/// not exist is reported the same way.
pub async fn assert_participant(
    store: &dyn ChatStore,
    chat: &str,
    user: &str,
) -> Result<(), ChatError> {
    if store.is_participant(chat, user).await? {
        Ok(())
    } else {
        debug!("Denied {user} access to chat {chat}");
        Err(ChatError::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, ChatType};
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_members_pass_and_others_are_denied() {
        let store = MemoryStore::new();
        let members = vec!["a".to_string(), "b".to_string()];
        let chat = Chat::new("ab".into(), ChatType::Direct, &members, Utc::now())
            .unwrap();
        let id = store.insert_chat(chat).await.unwrap();

        assert!(assert_participant(&store, &id, "a").await.is_ok());
        assert!(matches!(
            assert_participant(&store, &id, "c").await,
            Err(ChatError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_missing_chat_reads_as_denied() {
        let store = MemoryStore::new();
        let err = assert_participant(&store, "missing", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied));
        assert_eq!(err.to_string(), "Access denied");
    }
}
