//! Persisted launcher settings.
//!
//! Unlike the teacher's `SmolvmConfig`, this holds no registry of pool
//! state — the filesystem under `data_root` is the only authoritative
//! record of which slots exist and who holds them (spec §9). This file is
//! just the small set of tunables an operator might want to override.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application name used for the settings file location.
const APP_NAME: &str = "hottub";

/// Persisted, operator-tunable launcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HottubSettings {
    /// Settings format version.
    pub version: u8,

    /// Number of server slots per pool (spec default: small, single-digit).
    pub pool_size: u8,

    /// Maximum number of connect attempts against a just-reserved or
    /// already-existing slot before giving up on it.
    pub connect_retries: u32,

    /// Fixed delay between connect attempts, in milliseconds.
    pub connect_retry_delay_ms: u64,

    /// The argv token that opts an invocation into pooling.
    pub opt_in_flag: String,

    /// The synthetic VM option name used to tag a spawned server with its
    /// pool id (e.g. `-hottubid=<id>` prepended to the server's argv).
    pub pool_tag_option: String,
}

impl Default for HottubSettings {
    fn default() -> Self {
        Self {
            version: 1,
            pool_size: 4,
            connect_retries: 1024,
            connect_retry_delay_ms: 200,
            opt_in_flag: "-hottub".to_string(),
            pool_tag_option: "-hottubid".to_string(),
        }
    }
}

impl HottubSettings {
    /// Load settings from disk, falling back to defaults if none exist yet.
    pub fn load() -> Result<Self> {
        confy::load(APP_NAME, None).map_err(|e| Error::Config(e.to_string()))
    }

    /// Persist settings to disk.
    pub fn save(&self) -> Result<()> {
        confy::store(APP_NAME, None, self).map_err(|e| Error::Config(e.to_string()))
    }

    /// The connect-retry policy as a `hottub_protocol::RetryConfig`.
    pub fn retry_config(&self) -> hottub_protocol::RetryConfig {
        hottub_protocol::RetryConfig::new(
            self.connect_retries,
            Duration::from_millis(self.connect_retry_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let s = HottubSettings::default();
        assert_eq!(s.connect_retries, 1024);
        assert_eq!(s.connect_retry_delay_ms, 200);
        assert_eq!(s.opt_in_flag, "-hottub");
    }

    #[test]
    fn serializes_round_trip() {
        let s = HottubSettings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: HottubSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pool_size, s.pool_size);
    }
}
