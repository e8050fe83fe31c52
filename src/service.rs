use std::sync::Arc;

use crate::accounts::{Accounts, Credentials};
use crate::cache::CacheStore;
use crate::context::{Caller, Operation, RequestContext};
use crate::directory::ChatDirectory;
use crate::error::ChatError;
use crate::guard::{Admission, AuthenticatedOnly, GuardChain, RateLimitGuard};
use crate::message_log::MessageLog;
use crate::messages::{CreateChatRequest, MessagesQuery, SendMessageRequest, SentMessage};
use crate::models::{ChatSummary, Message, Participant, UserInfo};
use crate::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::realtime::Publisher;
use crate::store::ChatStore;

/// An operation result plus whatever the guards attached on the way in.
#[derive(Debug)]
pub struct Admitted<T> {
    pub value: T,
    pub admission: Admission,
}

impl<T> Admitted<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Admitted<U> {
        Admitted {
            value: f(self.value),
            admission: self.admission,
        }
    }
}

/// The operation surface: every call passes the guard chain, then reaches its component.
pub struct ChatService {
    guards: GuardChain,
    directory: ChatDirectory,
    log: MessageLog,
    accounts: Accounts,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        cache: Arc<dyn CacheStore>,
        publisher: Arc<dyn Publisher>,
        policy: RateLimitPolicy,
    ) -> Self {
        let guards = GuardChain::new()
            .with(RateLimitGuard::new(RateLimiter::new(cache), policy))
            .with(AuthenticatedOnly);

        Self {
            guards,
            directory: ChatDirectory::new(store.clone()),
            log: MessageLog::new(store.clone(), publisher),
            accounts: Accounts::new(store),
        }
    }

    /// bcrypt work factor used when signup stores a password.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.accounts = self.accounts.with_password_cost(cost);
        self
    }

    pub async fn authenticate(&self, header: Option<&str>) -> Caller {
        self.accounts.authenticate(header).await
    }

    pub async fn get_chats(
        &self,
        ctx: &RequestContext,
    ) -> Result<Admitted<Vec<ChatSummary>>, ChatError> {
        let admission = self.guards.admit(Operation::ListChats, ctx).await?;
        let value = self.directory.list_chats(ctx.caller.user_id()?).await?;
        Ok(Admitted { value, admission })
    }

    pub async fn create_chat(
        &self,
        ctx: &RequestContext,
        request: CreateChatRequest,
    ) -> Result<Admitted<String>, ChatError> {
        let admission = self.guards.admit(Operation::CreateChat, ctx).await?;
        let participants = request.participants.into_vec()?;
        let value = self
            .directory
            .create_chat(
                ctx.caller.user_id()?,
                &request.chat_name,
                participants,
                request.chat_type,
            )
            .await?;
        Ok(Admitted { value, admission })
    }

    pub async fn get_messages(
        &self,
        ctx: &RequestContext,
        chat: &str,
        query: MessagesQuery,
    ) -> Result<Admitted<Vec<Message>>, ChatError> {
        let admission = self.guards.admit(Operation::ListMessages, ctx).await?;
        let value = self
            .log
            .list_messages(ctx.caller.user_id()?, chat, query.after, query.limit)
            .await?;
        Ok(Admitted { value, admission })
    }

    pub async fn send_message(
        &self,
        ctx: &RequestContext,
        chat: &str,
        request: SendMessageRequest,
    ) -> Result<Admitted<SentMessage>, ChatError> {
        let admission = self.guards.admit(Operation::SendMessage, ctx).await?;
        let message = self
            .log
            .send_message(
                ctx.caller.user_id()?,
                chat,
                request.content,
                request.message_type,
            )
            .await?;
        Ok(Admitted {
            value: message.into(),
            admission,
        })
    }

    pub async fn mark_as_read(
        &self,
        ctx: &RequestContext,
        chat: &str,
    ) -> Result<Admitted<()>, ChatError> {
        let admission = self.guards.admit(Operation::MarkAsRead, ctx).await?;
        self.log.mark_as_read(ctx.caller.user_id()?, chat).await?;
        Ok(Admitted {
            value: (),
            admission,
        })
    }

    pub async fn get_chat_participants(
        &self,
        ctx: &RequestContext,
        chat: &str,
    ) -> Result<Admitted<Vec<Participant>>, ChatError> {
        let admission = self.guards.admit(Operation::ListParticipants, ctx).await?;
        let value = self
            .directory
            .get_participants(ctx.caller.user_id()?, chat)
            .await?;
        Ok(Admitted { value, admission })
    }

    pub async fn get_users(
        &self,
        ctx: &RequestContext,
    ) -> Result<Admitted<Vec<UserInfo>>, ChatError> {
        let admission = self.guards.admit(Operation::ListUsers, ctx).await?;
        let value = self.accounts.list_users(ctx.caller.user_id()?).await?;
        Ok(Admitted { value, admission })
    }

    pub async fn login(
        &self,
        ctx: &RequestContext,
        usr: &str,
        pwd: &str,
    ) -> Result<Admitted<Credentials>, ChatError> {
        let admission = self.guards.admit(Operation::Login, ctx).await?;
        let value = self.accounts.login(usr, pwd).await?;
        Ok(Admitted { value, admission })
    }

    pub async fn signup(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Admitted<Credentials>, ChatError> {
        let admission = self.guards.admit(Operation::Signup, ctx).await?;
        let value = self.accounts.signup(email, password, full_name).await?;
        Ok(Admitted { value, admission })
    }
}
