//! The error taxonomy for the launcher.
//!
//! Variants are grouped by propagation policy (see spec §7): fatal-to-
//! pooling errors cause the caller to fall back to a direct VM exec;
//! fatal-to-slot errors only abandon the current slot attempt. The enum
//! itself doesn't encode which is which — `src/pool.rs` and `src/main.rs`
//! match on variants explicitly at the point each policy applies.

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Fingerprinting the invocation failed (unreadable classpath entry,
    /// digest failure). Fatal-to-pooling.
    #[error("failed to fingerprint invocation: {0}")]
    Fingerprint(String),

    /// Couldn't resolve the launcher's own executable path. Fatal-to-
    /// pooling (fallback itself becomes impossible).
    #[error("failed to resolve self path: {0}")]
    SelfPath(io::Error),

    /// `mkdir` on a slot directory failed with something other than
    /// `EEXIST`. Fatal-to-pooling.
    #[error("failed to reserve pool slot: {0}")]
    SlotReserve(io::Error),

    /// Every slot in the pool was busy. Fatal-to-pooling (falls through to
    /// a direct exec).
    #[error("all pool slots are busy")]
    SlotsExhausted,

    /// Creating `client.pid` failed for a reason other than the slot being
    /// busy. Fatal-to-slot.
    #[error("failed to create client marker: {0}")]
    ClientMarker(io::Error),

    /// Forking the server process failed. Fatal-to-slot (another slot may
    /// still work).
    #[error("failed to spawn server: {0}")]
    SpawnServer(io::Error),

    /// Opening or connecting the pool socket failed (not counting the
    /// transient `ECONNREFUSED` retried internally). Fatal-to-slot.
    #[error("failed to connect to server: {0}")]
    Connect(io::Error),

    /// A send or receive during context transfer failed or was short.
    /// Fatal-to-slot.
    #[error("context transfer failed: {0}")]
    Transfer(io::Error),

    /// The final `exec` of the real VM binary failed. This is the one
    /// error with no further fallback — the launcher must report it and
    /// exit non-zero.
    #[error("failed to exec real VM: {0}")]
    ExecFailed(io::Error),

    /// Loading or saving the on-disk settings file failed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors the pool coordinator should treat as "abandon this
    /// slot, try the next one" rather than "give up on pooling entirely".
    pub fn is_slot_local(&self) -> bool {
        matches!(
            self,
            Error::ClientMarker(_) | Error::SpawnServer(_) | Error::Connect(_) | Error::Transfer(_)
        )
    }
}
