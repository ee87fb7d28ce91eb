//! Deadline arithmetic for user-supplied durations

use std::time::Duration;
use tokio::time::Instant;

/// Roughly thirty years; longer waits are treated as unbounded.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + timeout`, saturating to a far-future deadline instead of
/// overflowing when `timeout` is huge (e.g. `--timeout 18446744073709551615`).
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
