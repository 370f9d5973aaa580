//! Reason-sensitive timer delays.
//!
//! When many clients would retry at about the same moment, a short suggested
//! delay is replaced by a random one so their requests spread out.

use std::time::Duration;

use forumcache_core::BackoffPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Why a timer is being armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerReason {
    Initialization,
    Success,
    Failure,
    WillEnterForeground,
}

/// Delay before the next attempt.
///
/// `suggested` is the time until the tracker's suggested refresh time and
/// may be negative. After a success it is used as is (clamped at zero). For
/// any other reason a suggestion at or below the policy threshold becomes
/// `floor + uniform[0, spread)`.
pub fn compute_delay<R: Rng>(
    reason: TimerReason, suggested: chrono::Duration, policy: BackoffPolicy, rng: &mut R,
) -> Duration {
    let suggested = suggested.to_std().unwrap_or(Duration::ZERO);
    match reason {
        TimerReason::Success => suggested,
        TimerReason::Initialization | TimerReason::Failure | TimerReason::WillEnterForeground
            if suggested <= policy.threshold =>
        {
            policy.floor + jitter(policy.spread, rng)
        }
        _ => suggested,
    }
}

fn jitter<R: Rng>(spread: Duration, rng: &mut R) -> Duration {
    let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
    if spread_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.gen_range(0..spread_ms))
}
