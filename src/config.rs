use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::ifac::DEFAULT_IFAC_SIZE;

pub const DEFAULT_ANNOUNCE_CACHE_CAPACITY: usize = 1024;

/// Core configuration knobs. Parsing a configuration file is the
/// embedding application's business; this struct only enumerates what
/// the core consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// IFAC network name.
    pub netname: Option<String>,
    /// IFAC network passphrase.
    pub netkey: Option<String>,
    /// Interface access code length in bytes.
    pub ifac_size: usize,
    /// Ratchet rotation interval; `None` leaves rotation manual.
    pub ratchet_rotation_interval_secs: Option<u64>,
    /// Bound on the known-destinations cache.
    pub announce_cache_capacity: usize,
    /// Enables announce-cache persistence when set.
    pub announce_cache_path: Option<PathBuf>,
}

impl CoreConfig {
    pub fn ratchet_rotation_interval(&self) -> Option<Duration> {
        self.ratchet_rotation_interval_secs.map(Duration::from_secs)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            netname: None,
            netkey: None,
            ifac_size: DEFAULT_IFAC_SIZE,
            ratchet_rotation_interval_secs: None,
            announce_cache_capacity: DEFAULT_ANNOUNCE_CACHE_CAPACITY,
            announce_cache_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreConfig, DEFAULT_ANNOUNCE_CACHE_CAPACITY};

    #[test]
    fn defaults_are_open_and_bounded() {
        let config = CoreConfig::default();
        assert!(config.netname.is_none());
        assert!(config.netkey.is_none());
        assert!(config.ratchet_rotation_interval().is_none());
        assert_eq!(config.announce_cache_capacity, DEFAULT_ANNOUNCE_CACHE_CAPACITY);
        assert!(config.announce_cache_path.is_none());
    }
}
