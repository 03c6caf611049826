//! Retry policy for transient fetch failures

use std::time::Duration;

use serac_core::FetchErrorKind;

/// Delays between attempts within one poll cycle
///
/// Only [`FetchErrorKind::TransientNetwork`] failures are retried. With the
/// standard policy a cycle makes at most four attempts, waiting 1s, 2s and 4s
/// in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// 1s, 2s, 4s
    pub fn standard() -> Self {
        Self::new([1, 2, 4].map(Duration::from_secs))
    }

    /// Never retry
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            delays: delays.into_iter().collect(),
        }
    }

    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }

    /// Delay before retry number `retry` (0-based), if a failure of `kind`
    /// may be retried at all
    pub fn delay_for(&self, kind: FetchErrorKind, retry: usize) -> Option<Duration> {
        if !kind.is_retryable() {
            return None;
        }
        self.delays.get(retry).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_delays() {
        let policy = RetryPolicy::standard();
        let kind = FetchErrorKind::TransientNetwork;
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(kind, 0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(kind, 1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(kind, 2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(kind, 3), None);
    }

    #[test]
    fn test_terminal_kinds_not_retried() {
        let policy = RetryPolicy::standard();
        for kind in [
            FetchErrorKind::Authorization,
            FetchErrorKind::NotFoundOrOutOfSeason,
            FetchErrorKind::MalformedData,
        ] {
            assert_eq!(policy.delay_for(kind, 0), None, "{kind}");
        }
    }

    #[test]
    fn test_none() {
        assert_eq!(
            RetryPolicy::none().delay_for(FetchErrorKind::TransientNetwork, 0),
            None
        );
    }
}
