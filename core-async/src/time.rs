//! Time-related helpers.
//!
//! `timeout` bounds every plan action; `sleep` drives retry backoff.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, timeout, Duration};
//!
//! async fn example() {
//!     let result = timeout(Duration::from_millis(50), async {
//!         sleep(Duration::from_millis(5)).await;
//!         7
//!     })
//!     .await;
//!     assert_eq!(result.unwrap(), 7);
//! }
//! ```

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
pub use tokio::time::{error::Elapsed, interval, sleep, sleep_until, timeout, Interval, Sleep};

/// Returns the current time as milliseconds since UNIX_EPOCH.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Returns the current time as seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Exponential backoff delay for the given zero-based attempt, capped at `max`.
///
/// ```rust
/// use core_async::time::{backoff_delay, Duration};
///
/// let base = Duration::from_millis(100);
/// let max = Duration::from_secs(1);
/// assert_eq!(backoff_delay(base, max, 0), Duration::from_millis(100));
/// assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(400));
/// assert_eq!(backoff_delay(base, max, 10), max);
/// ```
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}
