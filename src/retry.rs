// src/retry.rs

//! Bounded exponential backoff for network-dependent operations
//!
//! Only operations that are safe to repeat may be wrapped here: the deploy
//! trigger and remote health probes. Never wrap restore or any other
//! operation with non-idempotent side effects.

use std::thread;
use std::time::Duration;
use tracing::warn;

/// Upper bound on a single backoff delay
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Invoke `operation` up to `max_attempts` times, doubling the delay between
/// attempts starting from `initial_delay`. The last error is returned once
/// attempts are exhausted.
pub fn execute_with_retry<T, E, F>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> std::result::Result<T, E>
where
    F: FnMut() -> std::result::Result<T, E>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 1..=max_attempts.max(1) {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < max_attempts {
                    warn!(
                        "attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    thread::sleep(delay);
                    delay = (delay * 2).min(MAX_DELAY);
                }
                last_error = Some(e);
            }
        }
    }

    // max_attempts >= 1, so at least one attempt ran and set last_error
    Err(last_error.expect("retry loop ran at least once"))
}
