// Tracker configuration - TOML loading, defaults and validation

use crate::error::{PtrackerError, PtrackerResult};
use crate::scenes::condition::{default_conditions, ConditionTable, SceneCondition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scene classifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsmConfig {
    /// Consecutive suspend events needed before a downgrade is allowed (default: 1)
    pub reset_threshold: u32,
    /// Ranked condition table, lowest rank first
    pub conditions: Vec<SceneCondition>,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            reset_threshold: 1,
            conditions: default_conditions(),
        }
    }
}

impl FsmConfig {
    pub fn validate(&self) -> PtrackerResult<()> {
        if self.reset_threshold == 0 {
            return Err(PtrackerError::config("fsm.reset_threshold must be at least 1"));
        }
        ConditionTable::new(self.conditions.clone())
            .map(|_| ())
            .map_err(|e| PtrackerError::config(format!("fsm.conditions: {}", e)))
    }
}

/// Dynamic TWT manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwtConfig {
    /// Feature flag at start-up
    pub enabled: bool,
    /// History entries kept
    pub record_count: usize,
    pub config_id: u8,
    pub wake_duration_us: u32,
    pub idle_interval_us: u32,
    pub web_interval_us: u32,
    pub streaming_interval_us: u32,
    /// Wait for the station to settle after a station change before setup
    pub station_settle_ms: u64,
    /// Byte limit for formatted history output
    pub history_buffer_size: usize,
}

impl Default for TwtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            record_count: 50,
            config_id: 3,
            wake_duration_us: 8192,
            idle_interval_us: 512_000,
            web_interval_us: 106_496,
            streaming_interval_us: 10_240,
            station_settle_ms: 1000,
            history_buffer_size: 10_240,
        }
    }
}

impl TwtConfig {
    pub fn validate(&self) -> PtrackerResult<()> {
        if self.record_count == 0 {
            return Err(PtrackerError::config("twt.record_count must be at least 1"));
        }
        if self.history_buffer_size == 0 {
            return Err(PtrackerError::config("twt.history_buffer_size must be non-zero"));
        }
        Ok(())
    }
}

/// Top-level tracker configuration.
///
/// ```toml
/// [fsm]
/// reset_threshold = 2
///
/// [twt]
/// enabled = false
/// station_settle_ms = 0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub fsm: FsmConfig,
    pub twt: TwtConfig,
}

impl TrackerConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> PtrackerResult<Self> {
        let config: TrackerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> PtrackerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> PtrackerResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> PtrackerResult<()> {
        self.fsm.validate()?;
        self.twt.validate()
    }
}
