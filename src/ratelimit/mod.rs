//! Process-wide outbound notification rate limiting.
//!
//! `TokenBucket` allows bursts up to its capacity while holding a long-run
//! average rate, which is what a notification sink needs: most of the time
//! nothing sends, but a verification-code resend burst shouldn't starve
//! everyone else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Allowed, with tokens/seconds-to-reset remaining.
    Allowed {
        /// Tokens left in the bucket after this request.
        remaining: u64,
        /// Seconds until the bucket is back at full capacity.
        reset_after: u64,
    },
    /// Denied, with the wait before retrying.
    Denied {
        /// Seconds until enough tokens will be available.
        retry_after: u64,
        /// The bucket's capacity, for reporting.
        limit: u64,
    },
}

impl Decision {
    /// Whether the request was allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Token bucket rate limiter with burst support.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    tokens: AtomicU64,
    refill_rate: f64,
    last_refill: AtomicU64,
}

impl TokenBucket {
    /// `capacity` tokens, refilled at `refill_rate` tokens/second.
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        let now = Self::now_nanos();
        Self {
            capacity,
            tokens: AtomicU64::new(capacity),
            refill_rate,
            last_refill: AtomicU64::new(now),
        }
    }

    /// Try to consume `tokens`, refilling first.
    pub fn check(&self, tokens: u64) -> Decision {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Acquire);

            if current >= tokens {
                if self
                    .tokens
                    .compare_exchange(current, current - tokens, Ordering::Release, Ordering::Acquire)
                    .is_ok()
                {
                    return Decision::Allowed {
                        remaining: current - tokens,
                        reset_after: self.time_until_refill(tokens),
                    };
                }
            } else {
                let retry_after = self.time_until_refill(tokens - current);
                return Decision::Denied {
                    retry_after,
                    limit: self.capacity,
                };
            }
        }
    }

    fn refill(&self) {
        let now = Self::now_nanos();
        let last = self.last_refill.load(Ordering::Acquire);

        let elapsed_nanos = now.saturating_sub(last);
        let elapsed_secs = elapsed_nanos as f64 / 1_000_000_000.0;
        let tokens_to_add = (elapsed_secs * self.refill_rate) as u64;

        if tokens_to_add > 0 && self.last_refill.compare_exchange(last, now, Ordering::Release, Ordering::Acquire).is_ok() {
            loop {
                let current = self.tokens.load(Ordering::Acquire);
                let new_tokens = std::cmp::min(current + tokens_to_add, self.capacity);
                if self
                    .tokens
                    .compare_exchange(current, new_tokens, Ordering::Release, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    fn time_until_refill(&self, needed_tokens: u64) -> u64 {
        if needed_tokens == 0 || self.refill_rate == 0.0 {
            return 0;
        }
        ((needed_tokens as f64 / self.refill_rate).ceil() as u64).max(1)
    }

    fn now_nanos() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }

    /// Current token count, after refilling.
    pub fn available_tokens(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_bursts_up_to_capacity() {
        let bucket = TokenBucket::new(5, 1.0);
        for _ in 0..5 {
            assert!(bucket.check(1).is_allowed());
        }
        assert!(!bucket.check(1).is_allowed());
    }

    #[test]
    fn denied_decision_reports_limit() {
        let bucket = TokenBucket::new(1, 1.0);
        bucket.check(1);
        match bucket.check(1) {
            Decision::Denied { limit, .. } => assert_eq!(limit, 1),
            other => panic!("expected Denied, got {:?}", other),
        }
    }
}
