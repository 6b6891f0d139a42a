use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::steam::{MatchPayload, MatchSource, RequestThrottle, SteamError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first throttled attempt; doubles on each further one.
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for FetchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(400),
        }
    }
}

impl FetchRetryPolicy {
    /// Deterministic part of the wait after throttled attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The sequence number resolved to no match.
    Empty,
    /// Upstream kept throttling until attempts ran out.
    Throttled,
}

/// Per-match fetch progress.
#[derive(Debug)]
pub enum FetchState {
    Attempting(u32),
    Success(Box<MatchPayload>),
    Skipped(SkipReason),
    Failed(String),
}

impl FetchState {
    /// Transition after attempt `attempt` produced `result`.
    pub fn advance(
        attempt: u32,
        max_attempts: u32,
        result: Result<Option<MatchPayload>, SteamError>,
    ) -> FetchState {
        match result {
            Ok(Some(payload)) => FetchState::Success(Box::new(payload)),
            Ok(None) => FetchState::Skipped(SkipReason::Empty),
            Err(SteamError::Throttled) if attempt < max_attempts => {
                FetchState::Attempting(attempt + 1)
            }
            Err(SteamError::Throttled) => FetchState::Skipped(SkipReason::Throttled),
            Err(other) => FetchState::Failed(other.to_string()),
        }
    }
}

/// Resolves one reference to a payload under the shared throttle.
///
/// Never fails the batch: every unrecoverable outcome becomes `None`.
pub struct Fetcher<'a> {
    source: &'a dyn MatchSource,
    throttle: &'a RequestThrottle,
    policy: FetchRetryPolicy,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        source: &'a dyn MatchSource,
        throttle: &'a RequestThrottle,
        policy: FetchRetryPolicy,
    ) -> Self {
        Self {
            source,
            throttle,
            policy,
        }
    }

    pub async fn fetch(&self, match_id: i64, seq_num: i64) -> Option<MatchPayload> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut state = FetchState::Attempting(1);
        loop {
            state = match state {
                FetchState::Attempting(attempt) => {
                    self.throttle.acquire().await;
                    let result = self.source.match_by_seq(seq_num).await;
                    let next = FetchState::advance(attempt, max_attempts, result);
                    if let FetchState::Attempting(_) = next {
                        let delay = self.policy.backoff(attempt) + self.policy.jitter();
                        warn!(
                            match_id,
                            seq = seq_num,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "429 from upstream; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    next
                }
                FetchState::Success(payload) => return Some(*payload),
                FetchState::Skipped(SkipReason::Empty) => {
                    warn!(match_id, seq = seq_num, "empty response for sequence number; skipping match");
                    return None;
                }
                FetchState::Skipped(SkipReason::Throttled) => {
                    error!(match_id, seq = seq_num, attempts = max_attempts, "match skipped after repeated 429s");
                    return None;
                }
                FetchState::Failed(reason) => {
                    error!(match_id, seq = seq_num, error = %reason, "steam api error; skipping match");
                    return None;
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> MatchPayload {
        MatchPayload {
            match_id: 1,
            ..MatchPayload::default()
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = FetchRetryPolicy::default();
        let waits = (1..=5).map(|a| policy.backoff(a).as_millis()).collect::<Vec<_>>();
        assert_eq!(waits, vec![200, 400, 800, 1600, 3200]);
    }

    #[test]
    fn throttled_attempts_advance_until_exhausted() {
        assert!(matches!(
            FetchState::advance(1, 5, Err(SteamError::Throttled)),
            FetchState::Attempting(2)
        ));
        assert!(matches!(
            FetchState::advance(4, 5, Err(SteamError::Throttled)),
            FetchState::Attempting(5)
        ));
        assert!(matches!(
            FetchState::advance(5, 5, Err(SteamError::Throttled)),
            FetchState::Skipped(SkipReason::Throttled)
        ));
    }

    #[test]
    fn other_outcomes_terminate_immediately() {
        assert!(matches!(
            FetchState::advance(1, 5, Ok(Some(payload()))),
            FetchState::Success(_)
        ));
        assert!(matches!(
            FetchState::advance(1, 5, Ok(None)),
            FetchState::Skipped(SkipReason::Empty)
        ));
        let http = SteamError::Http {
            status: 403,
            body: "forbidden".into(),
        };
        assert!(matches!(
            FetchState::advance(1, 5, Err(http)),
            FetchState::Failed(_)
        ));
    }
}
