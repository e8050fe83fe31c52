use async_trait::async_trait;
use log::warn;

use crate::context::{Caller, Operation, RequestContext};
use crate::error::ChatError;
use crate::rate_limit::{Decision, RateLimitPolicy, RateLimiter};

/// What the guards learned while letting a call through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    pub rate: Option<Decision>,
}

impl Admission {
    fn merge(self, other: Admission) -> Admission {
        Admission {
            rate: other.rate.or(self.rate),
        }
    }
}

#[async_trait]
pub trait Guard: Send + Sync {
    async fn check(&self, op: Operation, ctx: &RequestContext) -> Result<Admission, ChatError>;
}

pub struct RateLimitGuard {
    limiter: RateLimiter,
    policy: RateLimitPolicy,
}

impl RateLimitGuard {
    pub fn new(limiter: RateLimiter, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    async fn check(&self, op: Operation, ctx: &RequestContext) -> Result<Admission, ChatError> {
        let Some(limit) = self.policy.limit_for(op) else {
            return Ok(Admission::default());
        };

        let decision = self
            .limiter
            .admit(op.name(), ctx.caller.identity(), &ctx.addr, limit)
            .await;
        if !decision.allowed {
            warn!(
                "Rate limit exceeded for {} by {} from {}",
                op.name(),
                ctx.caller.identity(),
                ctx.addr
            );
            return Err(ChatError::RateLimited {
                limit: decision.limit,
                reset: decision.reset_secs,
            });
        }
        Ok(Admission {
            rate: Some(decision),
        })
    }
}

/// Rejects guests on every operation that is not explicitly open to them.
pub struct AuthenticatedOnly;

#[async_trait]
impl Guard for AuthenticatedOnly {
    async fn check(&self, op: Operation, ctx: &RequestContext) -> Result<Admission, ChatError> {
        if ctx.caller == Caller::Guest && !op.allows_guest() {
            return Err(ChatError::AuthenticationRequired);
        }
        Ok(Admission::default())
    }
}

/// Guards run in insertion order; the first denial wins.
#[derive(Default)]
pub struct GuardChain {
    guards: Vec<Box<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    pub async fn admit(&self, op: Operation, ctx: &RequestContext) -> Result<Admission, ChatError> {
        let mut admission = Admission::default();
        for guard in &self.guards {
            admission = admission.merge(guard.check(op, ctx).await?);
        }
        Ok(admission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::rate_limit::Limit;
    use std::sync::Arc;
    use std::time::Duration;

    fn chain(policy: RateLimitPolicy) -> GuardChain {
        GuardChain::new()
            .with(RateLimitGuard::new(
                RateLimiter::new(Arc::new(MemoryCache::new())),
                policy,
            ))
            .with(AuthenticatedOnly)
    }

    #[tokio::test]
    async fn test_guest_rejected_unless_operation_is_open() {
        let chain = chain(RateLimitPolicy::default());
        let guest = RequestContext::guest("10.0.0.1");

        assert!(matches!(
            chain.admit(Operation::ListChats, &guest).await,
            Err(ChatError::AuthenticationRequired)
        ));
        assert!(chain.admit(Operation::Login, &guest).await.is_ok());
        assert!(chain.admit(Operation::Signup, &guest).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_auth() {
        let mut policy = RateLimitPolicy::default();
        policy.set(Operation::ListChats, Limit::new(1, Duration::from_secs(60)));
        let chain = chain(policy);
        let guest = RequestContext::guest("10.0.0.1");

        assert!(matches!(
            chain.admit(Operation::ListChats, &guest).await,
            Err(ChatError::AuthenticationRequired)
        ));
        assert!(matches!(
            chain.admit(Operation::ListChats, &guest).await,
            Err(ChatError::RateLimited { limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_admission_carries_decision() {
        let chain = chain(RateLimitPolicy::default());
        let alice = RequestContext::user("alice", "10.0.0.1");

        let admission = chain.admit(Operation::SendMessage, &alice).await.unwrap();
        let decision = admission.rate.unwrap();
        assert_eq!(decision.limit, 100);
        assert_eq!(decision.remaining, 99);

        let unlimited = chain
            .admit(Operation::ListParticipants, &alice)
            .await
            .unwrap();
        assert_eq!(unlimited.rate, None);
    }
}
