use super::AttemptContext;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub retry_limit: u32,
    pub attempt_limit: u32,
    pub backoff: Duration,
}

/// What to do after a forward to the chosen peer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait out the backoff and forward to the same peer again.
    RetrySame(AttemptContext),
    /// Give up on the peer and select another one.
    Escalate(AttemptContext),
    /// Give up on the peer and on the request.
    Reject,
}

impl Decision {
    /// Whether the failing peer is abandoned, which marks it dead.
    pub fn abandons_peer(self) -> bool {
        !matches!(self, Decision::RetrySame(_))
    }
}

/// Entry check for a dispatch cycle. The ceiling is inclusive, so
/// `attempt_limit + 1` cycles are allowed per request.
pub fn admit(ctx: AttemptContext, limits: &DispatchLimits) -> bool {
    ctx.attempts() <= limits.attempt_limit
}

pub fn on_forward_failure(ctx: AttemptContext, limits: &DispatchLimits) -> Decision {
    if ctx.retries() < limits.retry_limit {
        return Decision::RetrySame(ctx.next_retry());
    }

    let next = ctx.escalate();
    if admit(next, limits) {
        Decision::Escalate(next)
    } else {
        Decision::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    #[test]
    fn retries_same_peer_below_limit() {
        let limits = DispatchConfig::default().limits();
        let mut ctx = AttemptContext::default();

        for expected in 1..=3 {
            match on_forward_failure(ctx, &limits) {
                Decision::RetrySame(next) => {
                    assert_eq!(next.retries(), expected);
                    ctx = next;
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }

        match on_forward_failure(ctx, &limits) {
            Decision::Escalate(next) => {
                assert_eq!(next.retries(), 0);
                assert_eq!(next.attempts(), 1);
            }
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn rejects_once_attempt_ceiling_is_passed() {
        let limits = DispatchConfig::default().limits();
        let mut ctx = AttemptContext::default();
        let mut forwards = 0;

        loop {
            forwards += 1;
            match on_forward_failure(ctx, &limits) {
                Decision::RetrySame(next) | Decision::Escalate(next) => ctx = next,
                Decision::Reject => break,
            }
        }

        assert_eq!(forwards, 16);
        assert_eq!(ctx.attempts(), 3);
    }

    #[test]
    fn zero_limits_reject_after_first_failure() {
        let limits = DispatchLimits {
            retry_limit: 0,
            attempt_limit: 0,
            backoff: Duration::ZERO,
        };
        assert!(admit(AttemptContext::default(), &limits));
        assert_eq!(on_forward_failure(AttemptContext::default(), &limits), Decision::Reject);
    }

    #[test]
    fn only_retry_keeps_the_peer() {
        let ctx = AttemptContext::default();
        assert!(!Decision::RetrySame(ctx).abandons_peer());
        assert!(Decision::Escalate(ctx).abandons_peer());
        assert!(Decision::Reject.abandons_peer());
    }

    #[test]
    fn admit_uses_inclusive_ceiling() {
        let limits = DispatchConfig::default().limits();
        let mut ctx = AttemptContext::default();
        for _ in 0..3 {
            ctx = ctx.escalate();
        }
        assert!(admit(ctx, &limits));
        assert!(!admit(ctx.escalate(), &limits));
    }
}
