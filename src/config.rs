// Topics, defaults, and session tuning
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::canopen::{NodeId, RetryPolicy};

// Feedback poll cadence while a node is moving
pub const POLL_PERIOD_MS: u64 = 100;

// Zenoh topics
pub const TOPIC_CMD: &str = "roboservo/cmd"; // commands from the UI
pub const TOPIC_REPLY: &str = "roboservo/reply"; // one reply per command
pub const TOPIC_FEEDBACK: &str = "roboservo/feedback"; // polled actual position

// Bus adapter
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BITRATE_KBPS: u32 = 1000;

// Jobs the session worker accepts before callers have to wait
pub const WORKER_QUEUE_DEPTH: usize = 16;

// Roboservo drives ship with low node ids; scanning all 127 takes minutes
pub const DEFAULT_SCAN_FIRST: u8 = 1;
pub const DEFAULT_SCAN_LAST: u8 = 9;

// Settle delays around a reboot
pub const SHUTDOWN_SETTLE_MS: u64 = 100;
pub const REBOOT_SETTLE_MS: u64 = 3000;

/// Inclusive limits in tenths of the display unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, tenths: i32) -> i32 {
        tenths.clamp(self.min, self.max)
    }
}

/// Target limits per operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetLimits {
    /// Tenths of a percent of rated torque
    pub torque: Bounds,
    /// Tenths of an rpm
    pub velocity: Bounds,
    /// Tenths of a degree
    pub position: Bounds,
}

impl Default for TargetLimits {
    fn default() -> Self {
        Self {
            torque: Bounds::new(-1000, 1000),
            velocity: Bounds::new(-1000, 1000),
            position: Bounds::new(-3600, 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-frame transmit and receive retries
    pub retry: RetryPolicy,
    /// How long one receive attempt may block in the adapter
    pub read_timeout_ms: u64,
    /// Treat abort frames answering a write as errors
    pub strict_download_abort: bool,
    pub limits: TargetLimits,
    pub scan_first: u8,
    pub scan_last: u8,
    pub shutdown_settle_ms: u64,
    pub reboot_settle_ms: u64,
    pub poll_period_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            read_timeout_ms: 0,
            strict_download_abort: false,
            limits: TargetLimits::default(),
            scan_first: DEFAULT_SCAN_FIRST,
            scan_last: DEFAULT_SCAN_LAST,
            shutdown_settle_ms: SHUTDOWN_SETTLE_MS,
            reboot_settle_ms: REBOOT_SETTLE_MS,
            poll_period_ms: POLL_PERIOD_MS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl SessionConfig {
    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if NodeId::new(self.scan_first).is_err() || NodeId::new(self.scan_last).is_err() {
            return Err(ConfigError::Invalid(format!(
                "scan range {}..={} must lie within {}..={}",
                self.scan_first,
                self.scan_last,
                NodeId::MIN,
                NodeId::MAX
            )));
        }
        if self.scan_first > self.scan_last {
            return Err(ConfigError::Invalid(format!(
                "scan range {}..={} is empty",
                self.scan_first, self.scan_last
            )));
        }

        let limits = [
            ("torque", self.limits.torque),
            ("velocity", self.limits.velocity),
            ("position", self.limits.position),
        ];
        for (name, bounds) in limits {
            if bounds.min > bounds.max {
                return Err(ConfigError::Invalid(format!(
                    "{} limits: min {} is above max {}",
                    name, bounds.min, bounds.max
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.poll_period_ms == 0 {
            return Err(ConfigError::Invalid("poll_period_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn scan_range(&self) -> RangeInclusive<u8> {
        self.scan_first..=self.scan_last
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_settle(&self) -> Duration {
        Duration::from_millis(self.shutdown_settle_ms)
    }

    pub fn reboot_settle(&self) -> Duration {
        Duration::from_millis(self.reboot_settle_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}
