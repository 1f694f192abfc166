//! Retry-with-backoff helpers.
//!
//! The pool coordinator polls for a not-yet-ready server socket with a
//! bounded number of attempts and a fixed delay between them (the original
//! source waits ~200ms between up to ~1024 attempts rather than growing the
//! delay, since the thing being waited on — a process finishing `fork`+exec
//! and opening a listening socket — takes a roughly constant amount of time
//! regardless of how long we've already waited).

use std::io;
use std::time::Duration;

/// Configuration for a bounded, fixed-delay retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// A new fixed-delay retry configuration.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryConfig {
    /// ~1024 attempts x 200ms ~= 3.4 minutes, matching the connect-retry
    /// budget described for the pool coordinator.
    fn default() -> Self {
        Self::new(1024, Duration::from_millis(200))
    }
}

/// Run `attempt` up to `config.max_attempts` times, sleeping `config.delay`
/// between tries, as long as `is_transient` returns true for the error it
/// produced. The first non-transient error, or exhaustion of the attempt
/// budget, is returned to the caller.
pub fn retry_with_backoff<T, E>(
    config: &RetryConfig,
    is_transient: impl Fn(&E) -> bool,
    mut attempt: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    let mut last_err = None;
    for n in 0..config.max_attempts {
        match attempt(n) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_transient(&e) {
                    return Err(e);
                }
                last_err = Some(e);
                if n + 1 < config.max_attempts {
                    std::thread::sleep(config.delay);
                }
            }
        }
    }
    Err(last_err.expect("loop ran at least once since max_attempts > 0 in practice"))
}

/// Whether an I/O error is likely transient and worth retrying (connection
/// not yet accepted, signal interruption).
pub fn is_transient_io_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Whether a raw errno-style network error is transient. `nix::Error`
/// dereferences to `Errno`, so callers can pass that straight in.
pub fn is_transient_network_error(errno: i32) -> bool {
    const ECONNREFUSED: i32 = 111;
    const EINTR: i32 = 4;
    const EAGAIN: i32 = 11;
    matches!(errno, ECONNREFUSED | EINTR | EAGAIN)
}
