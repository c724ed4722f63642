//! Configuration management
//!
//! Settings load from an optional YAML file merged with environment
//! overrides (prefix `TRIAGE`, sections separated by `__`, for example
//! `TRIAGE__THROTTLE__P2_HOURLY_CAP=5`). Every field has a default, so an
//! absent file yields a working configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the triage queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dedup: DedupConfig,
    pub lease: LeaseConfig,
    pub throttle: ThrottleConfig,
    pub fallback: FallbackConfig,
    pub dispatch: DispatchConfig,
}

/// Ticket store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file
    pub path: PathBuf,
    /// How long a writer waits on a locked database before reporting busy
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("triage-queue.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Duplicate suppression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a completed ticket keeps blocking its duplicate guard.
    /// Zero frees the guard the moment the ticket completes.
    pub retention_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { retention_secs: 0 }
    }
}

impl DedupConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Lease settings used when claiming tickets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Lease duration granted on claim and renew
    pub ttl_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl LeaseConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Creation throttling caps
///
/// P0 and P1 are exempt and carry no cap. The emergency window counts
/// creations across every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// P2 creations allowed per rolling window
    pub p2_hourly_cap: u32,
    /// Length of the P2 window
    pub p2_window_secs: u64,
    /// P3 creations allowed per rolling window
    pub p3_four_hour_cap: u32,
    /// Length of the P3 window
    pub p3_window_secs: u64,
    /// P4 creations allowed per rolling window
    pub p4_daily_cap: u32,
    /// Length of the P4 window
    pub p4_window_secs: u64,
    /// Creations across all tiers allowed inside the emergency window
    pub emergency_cap: u32,
    /// Length of the emergency window
    pub emergency_window_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            p2_hourly_cap: 10,
            p2_window_secs: 60 * 60,
            p3_four_hour_cap: 20,
            p3_window_secs: 4 * 60 * 60,
            p4_daily_cap: 50,
            p4_window_secs: 24 * 60 * 60,
            emergency_cap: 30,
            emergency_window_secs: 60,
        }
    }
}

impl ThrottleConfig {
    #[must_use]
    pub const fn p2_window(&self) -> Duration {
        Duration::from_secs(self.p2_window_secs)
    }

    #[must_use]
    pub const fn p3_window(&self) -> Duration {
        Duration::from_secs(self.p3_window_secs)
    }

    #[must_use]
    pub const fn p4_window(&self) -> Duration {
        Duration::from_secs(self.p4_window_secs)
    }

    #[must_use]
    pub const fn emergency_window(&self) -> Duration {
        Duration::from_secs(self.emergency_window_secs)
    }
}

/// Fallback queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Path of the durable fallback log
    pub path: PathBuf,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("triage-fallback.json"),
        }
    }
}

/// Dispatcher polling behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sleep between polls while the queue is empty
    pub poll_interval_ms: u64,
    /// Upper bound the idle sleep backs off to
    pub max_poll_interval_ms: u64,
    /// Stop the loop after the queue has stayed empty this long.
    /// `None` polls until the stop signal.
    pub idle_budget_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_poll_interval_ms: 30_000,
            idle_budget_ms: None,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    #[must_use]
    pub fn idle_budget(&self) -> Option<Duration> {
        self.idle_budget_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load configuration from a YAML file merged with environment overrides
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file or an override cannot be
    /// parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("TRIAGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Load from the given file when present, defaults plus environment
    /// overrides otherwise
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an existing file or an override
    /// cannot be parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load_from(path),
            _ => {
                let settings = config::Config::builder()
                    .add_source(
                        config::Environment::with_prefix("TRIAGE")
                            .prefix_separator("__")
                            .separator("__"),
                    )
                    .build()?;
                Ok(settings.try_deserialize()?)
            }
        }
    }
}
