//! Shared wire types for the hottub pool protocol.
//!
//! This crate holds the pieces that both the launcher binary (`hottub`) and
//! the read-mostly inspection tool (`hottubctl`) need to agree on: the shape
//! of a pool identity/slot path, and generic retry-with-backoff helpers used
//! wherever either binary polls a not-yet-ready resource.

pub mod id;
pub mod retry;

pub use id::PoolId;
pub use retry::{is_transient_io_error, is_transient_network_error, retry_with_backoff, RetryConfig};
