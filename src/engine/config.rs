//! Engine configuration options.

use crate::config::PlatformConfig;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Business rules: fees, risk limits, funded constants.
    pub platform: PlatformConfig,
    /// Maximum number of audit events to retain in memory.
    pub max_events: usize,
}

impl EngineConfig {
    pub fn new(platform: PlatformConfig) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            max_events: 100_000,
        }
    }
}
