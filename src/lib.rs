//! Multi-user chat service: direct and group chats, read receipts, realtime push,
//! account signup/login, and a fixed-window rate limiter in front of every operation.

pub mod access;
pub mod accounts;
pub mod cache;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod guard;
pub mod message_log;
pub mod messages;
pub mod models;
pub mod rate_limit;
pub mod realtime;
pub mod server;
pub mod service;
pub mod store;

pub use config::Config;
pub use context::{Caller, Operation, RequestContext};
pub use error::ChatError;
pub use service::{Admitted, ChatService};
