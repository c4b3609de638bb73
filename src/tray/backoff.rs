//! Reconnect backoff for the tray control channel.

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based).
///
/// The base doubles after every failure and is then scaled by the attempt
/// number, so with a 1s base the sequence is 1s, 4s, 12s, 32s, 80s.
/// Attempt 0 has no delay. Saturates instead of overflowing.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let doubled = 1u32
        .checked_shl(attempt - 1)
        .map_or(Duration::MAX, |factor| base.saturating_mul(factor));
    doubled.saturating_mul(attempt)
}
