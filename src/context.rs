use std::time::Duration;

use crate::error::ChatError;
use crate::rate_limit::Limit;

/// Identity reported for callers without valid credentials.
pub const GUEST: &str = "Guest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Guest,
    User(String),
}

impl Caller {
    pub fn identity(&self) -> &str {
        match self {
            Caller::Guest => GUEST,
            Caller::User(id) => id,
        }
    }

    pub fn user_id(&self) -> Result<&str, ChatError> {
        match self {
            Caller::Guest => Err(ChatError::AuthenticationRequired),
            Caller::User(id) => Ok(id),
        }
    }
}

/// Who is calling and from where. Threaded through every operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub caller: Caller,
    pub addr: String,
}

impl RequestContext {
    pub fn new(caller: Caller, addr: impl Into<String>) -> Self {
        Self {
            caller,
            addr: addr.into(),
        }
    }

    pub fn user(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self::new(Caller::User(id.into()), addr)
    }

    pub fn guest(addr: impl Into<String>) -> Self {
        Self::new(Caller::Guest, addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListChats,
    CreateChat,
    ListMessages,
    SendMessage,
    MarkAsRead,
    ListParticipants,
    ListUsers,
    Login,
    Signup,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::ListChats,
        Operation::CreateChat,
        Operation::ListMessages,
        Operation::SendMessage,
        Operation::MarkAsRead,
        Operation::ListParticipants,
        Operation::ListUsers,
        Operation::Login,
        Operation::Signup,
    ];

    /// Stable name used in rate-limit keys and `RATE_LIMIT_*` overrides.
    pub fn name(self) -> &'static str {
        match self {
            Operation::ListChats => "get_chats",
            Operation::CreateChat => "create_chat",
            Operation::ListMessages => "get_messages",
            Operation::SendMessage => "send_message",
            Operation::MarkAsRead => "mark_as_read",
            Operation::ListParticipants => "get_chat_participants",
            Operation::ListUsers => "get_users",
            Operation::Login => "login",
            Operation::Signup => "signup",
        }
    }

    pub fn allows_guest(self) -> bool {
        matches!(self, Operation::Login | Operation::Signup)
    }

    pub fn default_limit(self) -> Option<Limit> {
        let limit = match self {
            Operation::ListChats | Operation::SendMessage | Operation::MarkAsRead => 100,
            Operation::CreateChat | Operation::ListUsers => 50,
            Operation::ListMessages => 200,
            Operation::Login => 10,
            Operation::Signup => 5,
            Operation::ListParticipants => return None,
        };
        Some(Limit::new(limit, Duration::from_secs(60)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_has_no_user_id() {
        let ctx = RequestContext::guest("10.0.0.1");
        assert_eq!(ctx.caller.identity(), GUEST);
        assert!(matches!(
            ctx.caller.user_id(),
            Err(ChatError::AuthenticationRequired)
        ));
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(Operation::ListMessages.default_limit().unwrap().limit, 200);
        assert_eq!(Operation::Signup.default_limit().unwrap().limit, 5);
        assert!(Operation::ListParticipants.default_limit().is_none());
        assert!(Operation::ALL
            .iter()
            .filter_map(|op| op.default_limit())
            .all(|l| l.window == Duration::from_secs(60)));
    }
}
