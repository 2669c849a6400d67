use std::time::Duration;

use crate::config::{EME_LICENSE_REQUEST_BASE_DELAY, EME_LICENSE_REQUEST_MAX_DELAY};

pub mod http;

/// Delay to wait before the retry following the `attempt`-th failure,
/// starting at 1.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    EME_LICENSE_REQUEST_BASE_DELAY
        .saturating_mul(factor)
        .min(EME_LICENSE_REQUEST_MAX_DELAY)
}
