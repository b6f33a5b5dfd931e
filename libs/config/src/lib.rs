//! # Feedbench Harness Configuration
//!
//! ## Purpose
//!
//! Immutable startup configuration for the provider and consumer harnesses.
//! Built once at process start (defaults → optional TOML overlay → CLI
//! overrides applied by the binaries), validated, then passed by reference
//! into every thread. Nothing mutates it afterwards.
//!
//! Validation is strict: a zero rate where one is required, a latency rate
//! above its total rate, or inconsistent packing settings abort startup
//! with a descriptive error - they are never silently clamped.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Sentinel latency rate: stamp every message instead of a sampled subset.
pub const ALWAYS_SEND_LATENCY: i32 = -1;

/// Independent one-second schedules each latency random array precomputes.
pub const LATENCY_RANDOM_ARRAY_SET_COUNT: u32 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: i64,
        reason: &'static str,
    },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

fn default_ticks_per_sec() -> u32 {
    1000
}

fn default_updates_per_sec() -> u32 {
    100_000
}

fn default_latency_update_rate() -> i32 {
    10
}

fn default_refresh_burst_size() -> u32 {
    10
}

fn default_thread_count() -> u32 {
    1
}

fn default_run_time_secs() -> u64 {
    360
}

fn default_write_stats_interval_secs() -> u64 {
    5
}

fn default_total_buffers_per_pack() -> u32 {
    1
}

fn default_packing_buffer_length() -> u32 {
    6000
}

fn default_service_id() -> u16 {
    1
}

fn default_service_name() -> String {
    "DIRECT_FEED".to_string()
}

fn default_username() -> String {
    "perfuser".to_string()
}

fn default_prov_stats_file() -> String {
    "ProvStats".to_string()
}

fn default_prov_latency_file() -> String {
    "ProvLatency".to_string()
}

fn default_cons_stats_file() -> String {
    "ConsStats".to_string()
}

fn default_cons_latency_file() -> String {
    "ConsLatency".to_string()
}

fn default_item_request_count() -> u32 {
    100_000
}

fn default_requests_per_sec() -> u32 {
    500_000
}

/// Provider harness settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub ticks_per_sec: u32,
    pub updates_per_sec: u32,
    /// Latency updates per second, or `ALWAYS_SEND_LATENCY`.
    pub latency_update_rate: i32,
    pub gen_msgs_per_sec: u32,
    /// Latency generic messages per second, or `ALWAYS_SEND_LATENCY`.
    pub latency_gen_msg_rate: i32,
    pub refresh_burst_size: u32,
    pub thread_count: u32,
    pub run_time_secs: u64,
    pub write_stats_interval_secs: u64,
    pub total_buffers_per_pack: u32,
    pub packing_buffer_length: u32,
    pub service_id: u16,
    pub service_name: String,
    pub stats_filename: String,
    pub latency_filename: String,
    pub log_latency_to_file: bool,
    /// Display interval stats on stdout as well as the CSV files.
    pub display_stats: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ticks_per_sec: default_ticks_per_sec(),
            updates_per_sec: default_updates_per_sec(),
            latency_update_rate: default_latency_update_rate(),
            gen_msgs_per_sec: 0,
            latency_gen_msg_rate: 0,
            refresh_burst_size: default_refresh_burst_size(),
            thread_count: default_thread_count(),
            run_time_secs: default_run_time_secs(),
            write_stats_interval_secs: default_write_stats_interval_secs(),
            total_buffers_per_pack: default_total_buffers_per_pack(),
            packing_buffer_length: default_packing_buffer_length(),
            service_id: default_service_id(),
            service_name: default_service_name(),
            stats_filename: default_prov_stats_file(),
            latency_filename: default_prov_latency_file(),
            log_latency_to_file: false,
            display_stats: true,
        }
    }
}

impl ProviderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_sec == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ticks_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "thread_count",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.refresh_burst_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "refresh_burst_size",
                value: 0,
                reason: "must be positive",
            });
        }
        validate_latency_rate(
            "latency_update_rate",
            self.latency_update_rate,
            self.updates_per_sec,
            self.ticks_per_sec,
        )?;
        validate_latency_rate(
            "latency_gen_msg_rate",
            self.latency_gen_msg_rate,
            self.gen_msgs_per_sec,
            self.ticks_per_sec,
        )?;
        if self.total_buffers_per_pack == 0 {
            return Err(ConfigError::InvalidValue {
                name: "total_buffers_per_pack",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.total_buffers_per_pack > 1 && self.packing_buffer_length == 0 {
            return Err(ConfigError::Inconsistent(
                "packing_buffer_length must be positive when packing is enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn updates_per_tick(&self) -> u32 {
        self.updates_per_sec / self.ticks_per_sec
    }

    pub fn updates_per_tick_remainder(&self) -> u32 {
        self.updates_per_sec % self.ticks_per_sec
    }

    pub fn gen_msgs_per_tick(&self) -> u32 {
        self.gen_msgs_per_sec / self.ticks_per_sec
    }

    pub fn gen_msgs_per_tick_remainder(&self) -> u32 {
        self.gen_msgs_per_sec % self.ticks_per_sec
    }

    pub fn packing_enabled(&self) -> bool {
        self.total_buffers_per_pack > 1
    }

    pub fn microseconds_per_tick(&self) -> u64 {
        1_000_000 / self.ticks_per_sec as u64
    }
}

/// Consumer harness settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    pub ticks_per_sec: u32,
    pub item_request_count: u32,
    pub requests_per_sec: u32,
    /// Request snapshots instead of streaming subscriptions.
    pub request_snapshots: bool,
    pub posts_per_sec: u32,
    pub latency_posts_per_sec: i32,
    pub gen_msgs_per_sec: u32,
    pub latency_gen_msgs_per_sec: i32,
    pub thread_count: u32,
    pub run_time_secs: u64,
    pub write_stats_interval_secs: u64,
    /// Seconds past image retrieval before latency counts as steady state.
    pub delay_steady_state_calc_secs: u64,
    pub username: String,
    pub service_name: String,
    pub stats_filename: String,
    pub latency_filename: String,
    pub log_latency_to_file: bool,
    pub display_stats: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            ticks_per_sec: default_ticks_per_sec(),
            item_request_count: default_item_request_count(),
            requests_per_sec: default_requests_per_sec(),
            request_snapshots: false,
            posts_per_sec: 0,
            latency_posts_per_sec: 0,
            gen_msgs_per_sec: 0,
            latency_gen_msgs_per_sec: 0,
            thread_count: default_thread_count(),
            run_time_secs: default_run_time_secs(),
            write_stats_interval_secs: default_write_stats_interval_secs(),
            delay_steady_state_calc_secs: 30,
            username: default_username(),
            service_name: default_service_name(),
            stats_filename: default_cons_stats_file(),
            latency_filename: default_cons_latency_file(),
            log_latency_to_file: false,
            display_stats: true,
        }
    }
}

impl ConsumerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_sec == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ticks_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "thread_count",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.item_request_count == 0 {
            return Err(ConfigError::InvalidValue {
                name: "item_request_count",
                value: 0,
                reason: "must be positive",
            });
        }
        if self.requests_per_sec == 0 {
            return Err(ConfigError::InvalidValue {
                name: "requests_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        validate_latency_rate(
            "latency_posts_per_sec",
            self.latency_posts_per_sec,
            self.posts_per_sec,
            self.ticks_per_sec,
        )?;
        validate_latency_rate(
            "latency_gen_msgs_per_sec",
            self.latency_gen_msgs_per_sec,
            self.gen_msgs_per_sec,
            self.ticks_per_sec,
        )?;
        Ok(())
    }

    pub fn requests_per_tick(&self) -> u32 {
        self.requests_per_sec / self.ticks_per_sec
    }

    pub fn requests_per_tick_remainder(&self) -> u32 {
        self.requests_per_sec % self.ticks_per_sec
    }

    pub fn posts_per_tick(&self) -> u32 {
        self.posts_per_sec / self.ticks_per_sec
    }

    pub fn posts_per_tick_remainder(&self) -> u32 {
        self.posts_per_sec % self.ticks_per_sec
    }

    pub fn gen_msgs_per_tick(&self) -> u32 {
        self.gen_msgs_per_sec / self.ticks_per_sec
    }

    pub fn gen_msgs_per_tick_remainder(&self) -> u32 {
        self.gen_msgs_per_sec % self.ticks_per_sec
    }

    pub fn microseconds_per_tick(&self) -> u64 {
        1_000_000 / self.ticks_per_sec as u64
    }
}

/// A latency sample rate is valid when zero (off), the always-send
/// sentinel, or a positive rate no greater than its total rate.
fn validate_latency_rate(
    name: &'static str,
    latency_rate: i32,
    total_rate: u32,
    ticks_per_sec: u32,
) -> Result<(), ConfigError> {
    if latency_rate == ALWAYS_SEND_LATENCY || latency_rate == 0 {
        return Ok(());
    }
    if latency_rate < 0 {
        return Err(ConfigError::InvalidValue {
            name,
            value: latency_rate as i64,
            reason: "negative rates other than the always-send sentinel are invalid",
        });
    }
    if latency_rate as u32 > total_rate {
        return Err(ConfigError::Inconsistent(format!(
            "{name} ({latency_rate}) exceeds its total message rate ({total_rate})"
        )));
    }
    if total_rate > 0 && ticks_per_sec == 0 {
        return Err(ConfigError::InvalidValue {
            name: "ticks_per_sec",
            value: 0,
            reason: "must be positive when message rates are configured",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_provider_config_validates() {
        ProviderConfig::default().validate().unwrap();
    }

    #[test]
    fn latency_rate_above_total_is_rejected() {
        let config = ProviderConfig {
            updates_per_sec: 100,
            latency_update_rate: 200,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Inconsistent(_)
        ));
    }

    #[test]
    fn always_send_sentinel_is_accepted() {
        let config = ProviderConfig {
            latency_update_rate: ALWAYS_SEND_LATENCY,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn zero_ticks_per_sec_is_rejected() {
        let config = ProviderConfig {
            ticks_per_sec: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue { name: "ticks_per_sec", .. }
        ));
    }

    #[test]
    fn packing_without_length_is_rejected() {
        let config = ProviderConfig {
            total_buffers_per_pack: 10,
            packing_buffer_length: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn per_tick_remainder_distributes_rate() {
        let config = ProviderConfig {
            ticks_per_sec: 1000,
            updates_per_sec: 100_500,
            ..Default::default()
        };
        assert_eq!(config.updates_per_tick(), 100);
        assert_eq!(config.updates_per_tick_remainder(), 500);
    }

    #[test]
    fn toml_overlay_loads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "updates_per_sec = 50000\nlatency_update_rate = 5\nservice_name = \"TEST_FEED\""
        )
        .unwrap();
        let config = ProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.updates_per_sec, 50_000);
        assert_eq!(config.latency_update_rate, 5);
        assert_eq!(config.service_name, "TEST_FEED");
        // Unset keys keep defaults.
        assert_eq!(config.ticks_per_sec, 1000);
    }

    #[test]
    fn unknown_toml_key_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "updates_per_secc = 1").unwrap();
        assert!(matches!(
            ProviderConfig::from_file(file.path()).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
