use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::cache::CacheStore;
use crate::context::Operation;

pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// Reset reported when the store cannot tell how long a window has left.
pub const FALLBACK_RESET_SECS: u64 = 60;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub limit: u64,
    pub window: Duration,
}

impl Limit {
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Outcome of one `admit` call. `reset_secs` is only meaningful when `allowed` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

impl Decision {
    fn admitted(limit: Limit, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit: limit.limit,
            remaining,
            reset_secs: limit.window.as_secs(),
        }
    }
}

/// Fixed-window request counter over a shared cache.
///
/// Cache failures never block a request: a failed read admits the call, a failed
/// increment is logged and ignored.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn key(operation: &str, caller: &str, addr: &str) -> String {
        format!("{RATE_LIMIT_PREFIX}{operation}:{caller}:{addr}")
    }

    pub async fn admit(&self, operation: &str, caller: &str, addr: &str, limit: Limit) -> Decision {
        let key = Self::key(operation, caller, addr);

        let count = match self.cache.get(&key).await {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                warn!("Rate limit lookup failed for {key}, admitting: {e}");
                return Decision::admitted(limit, limit.limit.saturating_sub(1));
            }
        };

        if count >= limit.limit {
            let reset_secs = self.reset_secs(&key).await;
            debug!("Rate limit hit for {} ({}/{})", key, count, limit.limit);
            return Decision {
                allowed: false,
                limit: limit.limit,
                remaining: 0,
                reset_secs,
            };
        }

        let remaining = match self.cache.incr(&key, limit.window).await {
            Ok(now_used) => limit.limit.saturating_sub(now_used),
            Err(e) => {
                warn!("Rate limit increment failed for {key}: {e}");
                limit.limit - count - 1
            }
        };
        Decision::admitted(limit, remaining)
    }

    async fn reset_secs(&self, key: &str) -> u64 {
        match self.cache.ttl(key).await {
            Ok(Some(ttl)) if !ttl.is_zero() => ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0),
            Ok(_) => FALLBACK_RESET_SECS,
            Err(e) => {
                warn!("Rate limit ttl lookup failed for {key}: {e}");
                FALLBACK_RESET_SECS
            }
        }
    }
}

/// Per-operation limits: the built-in defaults, optionally overridden by
/// `RATE_LIMIT_<OPERATION>` (limit) and `RATE_LIMIT_<OPERATION>_WINDOW` (seconds).
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    limits: HashMap<Operation, Limit>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        let limits = Operation::ALL
            .iter()
            .filter_map(|op| op.default_limit().map(|limit| (*op, limit)))
            .collect();
        Self { limits }
    }
}

impl RateLimitPolicy {
    pub fn with_overrides<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::default();
        for op in Operation::ALL {
            let base = format!("RATE_LIMIT_{}", op.name().to_uppercase());
            let limit = parse_override(&base, lookup(&base));
            let window_key = format!("{base}_WINDOW");
            let window = parse_override(&window_key, lookup(&window_key)).map(Duration::from_secs);

            if limit.is_none() && window.is_none() {
                continue;
            }
            let current = policy
                .limit_for(op)
                .unwrap_or(Limit::new(limit.unwrap_or(0), DEFAULT_WINDOW));
            let limit = limit.unwrap_or(current.limit);
            let window = window.unwrap_or(current.window);
            policy.set(op, Limit::new(limit, window));
        }
        policy
    }

    pub fn limit_for(&self, op: Operation) -> Option<Limit> {
        self.limits.get(&op).copied()
    }

    pub fn set(&mut self, op: Operation, limit: Limit) {
        self.limits.insert(op, limit);
    }
}

fn parse_override(key: &str, value: Option<String>) -> Option<u64> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring {key}={value:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::CacheError;
    use async_trait::async_trait;

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<u64>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set(&self, _key: &str, _value: u64, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn incr(&self, _key: &str, _ttl: Duration) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    fn three_per_minute() -> Limit {
        Limit::new(3, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_counts_down_then_rejects() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()));
        let limit = three_per_minute();

        for expected in [2, 1, 0] {
            let decision = limiter
            .admit("send_message", "alice", "10.0.0.1", limit)
            .await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        tokio::time::advance(Duration::from_secs(15)).await;
        let rejected = limiter
            .admit("send_message", "alice", "10.0.0.1", limit)
            .await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_secs, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_expiry() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()));
        let limit = three_per_minute();
        for _ in 0..4 {
            limiter.admit("get_chats", "alice", "10.0.0.1", limit).await;
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        let decision = limiter.admit("get_chats", "alice", "10.0.0.1", limit).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryCache::new()));
        let limit = Limit::new(1, Duration::from_secs(60));

        let (ip, other_ip) = ("10.0.0.1", "10.0.0.2");

        assert!(limiter.admit("login", "Guest", ip, limit).await.allowed);
        assert!(!limiter.admit("login", "Guest", ip, limit).await.allowed);
        assert!(limiter.admit("login", "Guest", other_ip, limit).await.allowed);
        assert!(limiter.admit("signup", "Guest", ip, limit).await.allowed);
        assert!(limiter.admit("login", "bob", ip, limit).await.allowed);
    }

    #[tokio::test]
    async fn test_cache_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenCache));
        let limit = Limit::new(1, Duration::from_secs(60));
        for _ in 0..5 {
            let decision = limiter.admit("send_message", "alice", "10.0.0.1", limit);
            assert!(decision.await.allowed);
        }
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            RateLimiter::key("get_chats", "alice", "127.0.0.1"),
            "rate_limit:get_chats:alice:127.0.0.1"
        );
    }

    #[test]
    fn test_policy_overrides() {
        let policy = RateLimitPolicy::with_overrides(|key| match key {
            "RATE_LIMIT_GET_CHATS" => Some("500".to_string()),
            "RATE_LIMIT_LOGIN_WINDOW" => Some("300".to_string()),
            "RATE_LIMIT_SIGNUP" => Some("lots".to_string()),
            "RATE_LIMIT_GET_CHAT_PARTICIPANTS" => Some("20".to_string()),
            _ => None,
        });

        assert_eq!(
            policy.limit_for(Operation::ListChats),
            Some(Limit::new(500, Duration::from_secs(60)))
        );
        assert_eq!(
            policy.limit_for(Operation::Login),
            Some(Limit::new(10, Duration::from_secs(300)))
        );
        assert_eq!(
            policy.limit_for(Operation::Signup),
            Operation::Signup.default_limit()
        );
        assert_eq!(
            policy.limit_for(Operation::ListParticipants),
            Some(Limit::new(20, Duration::from_secs(60)))
        );
    }
}
