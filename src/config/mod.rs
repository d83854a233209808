//! # Configuration Management Module
//!
//! This module handles all configuration aspects of the Lorawatch system, providing
//! a centralized configuration system with validation, defaults, and persistence.
//!
//! ## Features
//!
//! - **Structured Configuration**: Type-safe configuration with serde serialization
//! - **Validation**: Eager validation of all configuration values at load time
//! - **Defaults**: Sensible default values for all configuration options
//! - **Environment Integration**: Environment variable overrides for deployment secrets
//!
//! ## Configuration Structure
//!
//! The configuration is organized into logical sections:
//!
//! - [`DeviceConfig`] - Sensor device identity and listen timeouts
//! - [`RadioConfig`] - Serial modem settings
//! - [`InfluxDbConfig`] - Time-series database connection settings
//! - [`StorageConfig`] - Daily log file settings
//! - [`RetryConfig`] - Database write retry policy
//! - [`ProcessingConfig`] - Field aliases and validation ranges
//! - [`LoggingConfig`] - Logging and debugging settings
//!
//! ## Configuration File Format
//!
//! Lorawatch uses TOML format for human-readable configuration:
//!
//! ```toml
//! [device]
//! id = "Device5"
//! listen_timeout_secs = 10.0
//!
//! [radio]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [influxdb]
//! url = "http://localhost:8086"
//! org = "home"
//! bucket = "sensors"
//! token = ""   # or set INFLUXDB_TOKEN
//!
//! [processing.aliases]
//! Max_A = "maxAcceleration_m/s2"
//!
//! [processing.ranges.Temp]
//! min = -40.0
//! max = 85.0
//! ```
//!
//! ## Environment Integration
//!
//! A fixed set of environment variables overrides the file after parsing and
//! before validation: `INFLUXDB_TOKEN`, `INFLUXDB_URL`, `INFLUXDB_ORG`,
//! `INFLUXDB_BUCKET`, `DEVICE_ID`, `LOG_LEVEL`. Secrets such as the InfluxDB
//! token are expected to arrive this way in production deployments.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

/// Sensor device identity and listen behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier expected in every message (`ID:<id>, ...`).
    pub id: String,
    /// Payload sent as the cycle handshake. Defaults to the device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_message: Option<String>,
    /// Overall listen window per cycle, in seconds.
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_secs: f64,
    /// Per-receive sub-timeout inside the listen window, in seconds.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: f64,
}

fn default_listen_timeout() -> f64 {
    10.0
}

fn default_receive_timeout() -> f64 {
    1.0
}

impl DeviceConfig {
    /// The handshake payload: the configured message, or the device id when unset.
    pub fn handshake_payload(&self) -> &str {
        self.handshake_message.as_deref().unwrap_or(&self.id)
    }
}

/// Serial LoRa modem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    pub port: String,
    pub baud_rate: u32,
}

/// InfluxDB v2 connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    /// API token. May be left empty in the file and supplied via INFLUXDB_TOKEN.
    #[serde(default)]
    pub token: String,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    10
}

/// Daily log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory; each reading lands under `<log_base_dir>/<YYYY-MM-DD>/`.
    pub log_base_dir: String,
    /// File name within the daily directory.
    pub daily_log_file: String,
}

/// Database write retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_initial_delay() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            initial_delay_secs: default_initial_delay(),
        }
    }
}

/// Numeric bounds for one canonical field. Either side may be absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Field alias and validation range tables, static per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Raw field name -> canonical field name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Canonical field name -> numeric bounds.
    #[serde(default)]
    pub ranges: HashMap<String, RangeBounds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub radio: RadioConfig,
    pub influxdb: InfluxDbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file, apply environment overrides, and validate.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply the fixed environment override table on top of file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("INFLUXDB_TOKEN") {
            if !v.is_empty() {
                self.influxdb.token = v;
            }
        }
        if let Ok(v) = std::env::var("INFLUXDB_URL") {
            if !v.is_empty() {
                self.influxdb.url = v;
            }
        }
        if let Ok(v) = std::env::var("INFLUXDB_ORG") {
            if !v.is_empty() {
                self.influxdb.org = v;
            }
        }
        if let Ok(v) = std::env::var("INFLUXDB_BUCKET") {
            if !v.is_empty() {
                self.influxdb.bucket = v;
            }
        }
        if let Ok(v) = std::env::var("DEVICE_ID") {
            if !v.is_empty() {
                self.device.id = v;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            if !v.is_empty() {
                self.logging.level = v;
            }
        }
    }

    /// Eagerly validate values the core depends on, so it never needs
    /// defensive missing-key handling.
    pub fn validate(&self) -> Result<()> {
        if self.device.id.trim().is_empty() {
            return Err(anyhow!("device.id must not be empty"));
        }
        if self.influxdb.token.is_empty() {
            return Err(anyhow!(
                "InfluxDB token must be set in config or INFLUXDB_TOKEN environment variable"
            ));
        }
        if self.device.listen_timeout_secs <= 0.0 || self.device.receive_timeout_secs <= 0.0 {
            return Err(anyhow!("device listen/receive timeouts must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_factor <= 0.0 {
            return Err(anyhow!("retry.backoff_factor must be positive"));
        }
        if self.retry.initial_delay_secs < 0.0 {
            return Err(anyhow!("retry.initial_delay_secs must not be negative"));
        }
        if self.storage.log_base_dir.is_empty() || self.storage.daily_log_file.is_empty() {
            return Err(anyhow!(
                "storage.log_base_dir and storage.daily_log_file are required"
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut aliases = HashMap::new();
        aliases.insert("Max_A".to_string(), "maxAcceleration_m/s2".to_string());

        let mut ranges = HashMap::new();
        ranges.insert(
            "Temp".to_string(),
            RangeBounds {
                min: Some(-40.0),
                max: Some(85.0),
            },
        );

        Config {
            device: DeviceConfig {
                id: "Device5".to_string(),
                handshake_message: None,
                listen_timeout_secs: default_listen_timeout(),
                receive_timeout_secs: default_receive_timeout(),
            },
            radio: RadioConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
            },
            influxdb: InfluxDbConfig {
                url: "http://localhost:8086".to_string(),
                org: "home".to_string(),
                bucket: "sensors".to_string(),
                token: String::new(),
                timeout_secs: default_http_timeout(),
            },
            storage: StorageConfig {
                log_base_dir: "./logs".to_string(),
                daily_log_file: "sensor_data.log".to_string(),
            },
            retry: RetryConfig::default(),
            processing: ProcessingConfig { aliases, ranges },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("lorawatch.log".to_string()),
            },
        }
    }
}
