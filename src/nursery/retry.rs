use std::time::Duration;

use rand::Rng as _;

use crate::chain::{TransactionLookup, TransactionProvider};

/// Backoff for transaction lookups that failed transiently.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Bound on a single lookup; hitting it counts as a transient failure.
    pub timeout: Duration,
    /// `None` retries until the lookup resolves or the nursery shuts down.
    pub max_retries: Option<usize>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            jitter_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp));
        let capped = backoff.min(self.max_delay);
        let jitter = if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        };
        capped + jitter
    }
}

pub(crate) async fn lookup_with_timeout<P>(
    chain: &P,
    id: &str,
    timeout: Duration,
) -> TransactionLookup
where
    P: TransactionProvider + ?Sized,
{
    match tokio::time::timeout(timeout, chain.get_transaction(id)).await {
        Ok(lookup) => lookup,
        Err(_) => TransactionLookup::TransientFailure(format!(
            "lookup of {id} timed out after {}ms",
            timeout.as_millis()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RetryConfig {
            timeout: Duration::from_millis(10),
            max_retries: Some(5),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter_ms: 0,
        };
        assert_eq!(cfg.backoff(0), Duration::from_millis(100));
        assert_eq!(cfg.backoff(1), Duration::from_millis(200));
        assert_eq!(cfg.backoff(2), Duration::from_millis(400));
        assert_eq!(cfg.backoff(3), Duration::from_millis(500));
        assert_eq!(cfg.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_range() {
        let cfg = RetryConfig {
            jitter_ms: 50,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        };
        for attempt in 0..20 {
            let delay = cfg.backoff(attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(60));
        }
    }
}
