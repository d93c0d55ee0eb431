//! Configuration management for Helios
//!
//! This module handles loading, validation, and management of the arbiter
//! configuration from YAML files. Defaults reproduce the platform tuning the
//! arbiter ships with, so an empty file is a valid configuration.

use crate::error::{HeliosError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Charging source inventory
    pub sources: SourcesConfig,

    /// Battery-voltage and demand thresholds for source selection
    pub limits: LimitsConfig,

    /// Cadence, grace and timeout table for the two control loops
    pub timing: TimingConfig,

    /// Travel-adapter window used to seed the programmable operating point
    pub adapter: AdapterConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Charging source inventory
///
/// Index 0 is the default charger and must always be present. At most one
/// other entry may be flagged `dc_capable`; that entry is the direct-charge
/// path the selection policy can pick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Ordered charger list; position is the registry index
    pub chargers: Vec<ChargerEntry>,

    /// Published name of the wired programmable source, if wired direct
    /// charge is fitted
    pub wired_pps: Option<String>,

    /// Published name of the wireless programmable source, if wireless
    /// direct charge is fitted
    pub wireless_pps: Option<String>,
}

/// One registry slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargerEntry {
    /// Published device name used for discovery
    pub name: String,

    /// Whether this charger is the direct-charge conversion path
    #[serde(default)]
    pub dc_capable: bool,
}

/// Battery-voltage and demand thresholds
///
/// Voltages are in microvolts. A zero threshold disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Demand product (mA * mV) above which direct charge is preferred when
    /// no voltage thresholds are configured
    pub demand_threshold: u32,

    /// Direct charge is not started below this battery voltage
    pub vbatt_min_uv: i32,

    /// Selection is not even evaluated below this battery voltage
    pub vbatt_low_uv: i32,

    /// Direct charge is forced off above this battery voltage
    pub vbatt_max_uv: i32,

    /// Direct charge is not started above this battery voltage
    pub vbatt_high_uv: i32,
}

/// Cadence, grace and timeout table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Selection retry interval when the policy answers "retry later"
    pub select_retry_ms: u64,

    /// Grace delay between committing to direct charge and the first
    /// negotiation step, and between handover and the first steady check
    pub enable_grace_ms: u64,

    /// Steady-state supervision cadence while in passthrough
    pub run_interval_ms: u64,

    /// Retry delay after transient controller errors
    pub error_retry_ms: u64,

    /// Retry delay while waiting for a programmable contract
    pub prog_retry_ms: u64,

    /// Retry delay while waiting for a session to go active
    pub active_retry_ms: u64,

    /// Keep-alive cadence suggested after a successful request refresh
    pub keep_alive_ms: u64,

    /// Window after session start within which some source must stop
    /// erroring out of detection
    pub prog_timeout_s: u64,

    /// Window after session start within which a source must reach active
    pub active_timeout_s: u64,

    /// Delay before the first discovery attempt
    pub init_delay_ms: u64,

    /// Delay between discovery retries
    pub init_retry_ms: u64,

    /// Discovery retry budget before starting degraded
    pub init_retries: u32,

    /// Consecutive transient watchdog failures tolerated in passthrough
    pub watchdog_retry_budget: u32,

    /// Device errors tolerated on an active session before it is benched
    pub pps_error_budget: u32,
}

/// Travel-adapter window for the initial programmable request
///
/// Voltages in microvolts, current in microamps. The request seed is
/// `2 * vbatt + vbatt_headroom_uv`, clamped into `[ta_vmin_uv, ta_vmax_uv]`
/// and rounded down to `voltage_step_uv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Highest voltage ever requested from an adapter
    pub ta_vmax_uv: i32,

    /// Lowest useful request voltage; zero accepts the adapter minimum
    pub ta_vmin_uv: i32,

    /// Headroom added on top of twice the battery voltage
    pub vbatt_headroom_uv: i32,

    /// Request granularity of the programmable protocol
    pub voltage_step_uv: i32,

    /// Ceiling for the requested operating current
    pub op_current_max_ua: i32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    pub level: String,

    /// Path to log file
    pub file: String,

    /// Max log file size in MB
    pub max_file_size_mb: u32,

    /// Number of backup files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            chargers: vec![
                ChargerEntry {
                    name: "main-charger".to_string(),
                    dc_capable: false,
                },
                ChargerEntry {
                    name: "dc-charger".to_string(),
                    dc_capable: true,
                },
            ],
            wired_pps: Some("wired-pps".to_string()),
            wireless_pps: Some("wireless-pps".to_string()),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            demand_threshold: 0,
            vbatt_min_uv: 3_600_000,
            vbatt_low_uv: 3_400_000,
            vbatt_max_uv: 4_400_000,
            vbatt_high_uv: 4_350_000,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            select_retry_ms: 5000,
            enable_grace_ms: 5000,
            run_interval_ms: 9000,
            error_retry_ms: 1000,
            prog_retry_ms: 5000,
            active_retry_ms: 1500,
            keep_alive_ms: 7000,
            prog_timeout_s: 10,
            active_timeout_s: 25,
            init_delay_ms: 100,
            init_retry_ms: 1000,
            init_retries: 10,
            watchdog_retry_budget: 3,
            pps_error_budget: 5,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ta_vmax_uv: 9_800_000,
            ta_vmin_uv: 8_000_000,
            vbatt_headroom_uv: 500_000,
            voltage_step_uv: 20_000,
            op_current_max_ua: 5_000_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/helios.log".to_string(),
            max_file_size_mb: 10,
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl SourcesConfig {
    /// Registry index of the direct-charge capable charger, if any
    pub fn dc_index(&self) -> Option<usize> {
        self.chargers.iter().position(|c| c.dc_capable)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.normalize();
        Ok(config)
    }

    /// Load configuration with validation
    pub fn load() -> Result<Self> {
        // Try to load from default locations
        let default_paths = [
            "helios_config.yaml",
            "/data/helios_config.yaml",
            "/etc/helios/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Clamp threshold pairs into a usable ordering.
    ///
    /// The low watermark may not sit above the start floor and the high
    /// watermark may not sit above the hard ceiling; out-of-order values are
    /// pulled down rather than rejected.
    pub fn normalize(&mut self) {
        let limits = &mut self.limits;
        if limits.vbatt_min_uv > 0 && limits.vbatt_low_uv > limits.vbatt_min_uv {
            tracing::warn!(
                low = limits.vbatt_low_uv,
                min = limits.vbatt_min_uv,
                "vbatt_low above vbatt_min, clamping"
            );
            limits.vbatt_low_uv = limits.vbatt_min_uv;
        }
        if limits.vbatt_max_uv > 0 && limits.vbatt_high_uv > limits.vbatt_max_uv {
            tracing::warn!(
                high = limits.vbatt_high_uv,
                max = limits.vbatt_max_uv,
                "vbatt_high above vbatt_max, clamping"
            );
            limits.vbatt_high_uv = limits.vbatt_max_uv;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sources.chargers.is_empty() {
            return Err(HeliosError::validation(
                "sources.chargers",
                "at least the default charger is required",
            ));
        }

        let mut names: Vec<&str> = self
            .sources
            .chargers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        if let Some(name) = self.sources.wired_pps.as_deref() {
            names.push(name);
        }
        if let Some(name) = self.sources.wireless_pps.as_deref() {
            names.push(name);
        }
        if names.iter().any(|n| n.is_empty()) {
            return Err(HeliosError::validation(
                "sources",
                "source names cannot be empty",
            ));
        }
        let mut seen = names.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != names.len() {
            return Err(HeliosError::validation(
                "sources",
                "source names must be unique",
            ));
        }

        let dc_count = self
            .sources
            .chargers
            .iter()
            .filter(|c| c.dc_capable)
            .count();
        if dc_count > 1 {
            return Err(HeliosError::validation(
                "sources.chargers",
                "at most one charger may be dc_capable",
            ));
        }
        if self
            .sources
            .chargers
            .first()
            .is_some_and(|c| c.dc_capable)
        {
            return Err(HeliosError::validation(
                "sources.chargers",
                "the default charger cannot be the direct-charge path",
            ));
        }

        if self.timing.run_interval_ms == 0
            || self.timing.error_retry_ms == 0
            || self.timing.select_retry_ms == 0
        {
            return Err(HeliosError::validation(
                "timing",
                "loop intervals must be greater than 0",
            ));
        }
        if self.timing.prog_timeout_s == 0 || self.timing.active_timeout_s == 0 {
            return Err(HeliosError::validation(
                "timing",
                "negotiation timeouts must be greater than 0",
            ));
        }

        if self.adapter.voltage_step_uv <= 0 {
            return Err(HeliosError::validation(
                "adapter.voltage_step_uv",
                "must be positive",
            ));
        }
        if self.adapter.ta_vmin_uv > self.adapter.ta_vmax_uv {
            return Err(HeliosError::validation(
                "adapter",
                "ta_vmin_uv must not exceed ta_vmax_uv",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sources.chargers.len(), 2);
        assert_eq!(config.sources.dc_index(), Some(1));
        assert_eq!(config.limits.vbatt_min_uv, 3_600_000);
        assert_eq!(config.limits.vbatt_low_uv, 3_400_000);
        assert_eq!(config.timing.run_interval_ms, 9000);
        assert_eq!(config.timing.prog_timeout_s, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // No chargers at all
        config.sources.chargers.clear();
        assert!(config.validate().is_err());

        // Default slot flagged as the DC path
        config = Config::default();
        config.sources.chargers[0].dc_capable = true;
        assert!(config.validate().is_err());

        // Duplicate names across chargers and programmable sources
        config = Config::default();
        config.sources.wired_pps = Some("dc-charger".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_clamps_watermarks() {
        let mut config = Config::default();
        config.limits.vbatt_low_uv = 3_700_000;
        config.limits.vbatt_high_uv = 4_500_000;
        config.normalize();
        assert_eq!(config.limits.vbatt_low_uv, 3_600_000);
        assert_eq!(config.limits.vbatt_high_uv, 4_400_000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.limits.vbatt_max_uv,
            deserialized.limits.vbatt_max_uv
        );
        assert_eq!(config.sources.chargers.len(), deserialized.sources.chargers.len());
    }
}
