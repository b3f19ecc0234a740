//! Service configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use compost_core::{Calibration, SysfsPaths};
use compost_store::LogOptions;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Durable log settings.
    pub storage: StorageConfig,
    /// Sensor backend and calibration.
    pub sensor: SensorConfig,
    /// Sampling and logging cadence.
    pub schedule: ScheduleConfig,
    /// Remote telemetry endpoint.
    pub sync: SyncConfig,
    /// Web server toggle.
    pub control: ControlConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use compost_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.sensor.validate());
        errors.extend(self.schedule.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.control.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:80" on the access point).
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
        } else {
            match parts[0].parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", parts[0]),
                )),
                Ok(_) => {}
            }
        }

        errors
    }
}

/// Smallest capacity that still fits the header and a handful of rows.
pub const MIN_CAPACITY_BYTES: u64 = 1024;

/// Durable log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `log.csv`.
    pub dir: PathBuf,
    /// Size limit of the log in bytes (unlimited when omitted).
    pub capacity_bytes: Option<u64>,
    /// Flush every append before acknowledging it.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: compost_store::default_log_dir(),
            capacity_bytes: None,
            sync_writes: true,
        }
    }
}

impl StorageConfig {
    /// Options for opening the log.
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            capacity_bytes: self.capacity_bytes,
            sync_writes: self.sync_writes,
        }
    }

    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.dir",
                "log directory cannot be empty",
            ));
        }
        if let Some(capacity) = self.capacity_bytes
            && capacity < MIN_CAPACITY_BYTES
        {
            errors.push(ValidationError::new(
                "storage.capacity_bytes",
                format!(
                    "capacity {} is too small (minimum {} bytes)",
                    capacity, MIN_CAPACITY_BYTES
                ),
            ));
        }

        errors
    }
}

/// Which sensor backend feeds the sample source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Linux 1-wire and IIO attributes.
    Sysfs,
    /// Synthetic readings, for running without hardware.
    #[default]
    Simulated,
}

/// Sensor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub backend: BackendKind,
    /// Attribute paths for the sysfs backend.
    pub sysfs: SysfsPaths,
    /// Worst-case probe conversion time in milliseconds.
    pub conversion_timeout_ms: u64,
    /// Offset of local time from UTC in hours, applied to timestamps.
    pub utc_offset_hours: i8,
    pub calibration: Calibration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            sysfs: SysfsPaths::default(),
            conversion_timeout_ms: 1000,
            utc_offset_hours: 0,
            calibration: Calibration::default(),
        }
    }
}

impl SensorConfig {
    /// Validate sensor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = self
            .calibration
            .validate()
            .into_iter()
            .map(|message| ValidationError::new("sensor.calibration", message))
            .collect();

        if self.conversion_timeout_ms == 0 || self.conversion_timeout_ms > 10_000 {
            errors.push(ValidationError::new(
                "sensor.conversion_timeout_ms",
                format!(
                    "conversion timeout {} must be between 1 and 10000 ms",
                    self.conversion_timeout_ms
                ),
            ));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            errors.push(ValidationError::new(
                "sensor.utc_offset_hours",
                format!(
                    "UTC offset {} is outside -12..=14",
                    self.utc_offset_hours
                ),
            ));
        }

        errors
    }
}

/// Minimum log interval in seconds.
pub const MIN_LOG_INTERVAL: u64 = 5;
/// Maximum log interval in seconds (1 day).
pub const MAX_LOG_INTERVAL: u64 = 86_400;

/// Sampling and logging cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between sensor samples (live view refresh).
    pub sample_interval_secs: u64,
    /// Seconds between durable appends (and sync attempts).
    pub log_interval_secs: u64,
    /// One-time gas sensor preheat before the loop starts.
    pub warmup_secs: u64,
    /// Entries kept in memory for delivery retry.
    pub backlog_capacity: usize,
    /// Backlog entries retried after a successful delivery.
    pub backlog_per_tick: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 2,
            log_interval_secs: 60,
            warmup_secs: 20,
            backlog_capacity: 64,
            backlog_per_tick: 4,
        }
    }
}

impl ScheduleConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    /// Validate schedule configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sample_interval_secs == 0 {
            errors.push(ValidationError::new(
                "schedule.sample_interval_secs",
                "sample interval cannot be 0",
            ));
        }
        if self.log_interval_secs < MIN_LOG_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.log_interval_secs",
                format!(
                    "log interval {} is too short (minimum {} seconds)",
                    self.log_interval_secs, MIN_LOG_INTERVAL
                ),
            ));
        } else if self.log_interval_secs > MAX_LOG_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.log_interval_secs",
                format!(
                    "log interval {} is too long (maximum {} seconds / 1 day)",
                    self.log_interval_secs, MAX_LOG_INTERVAL
                ),
            ));
        }
        if self.sample_interval_secs > self.log_interval_secs {
            errors.push(ValidationError::new(
                "schedule.sample_interval_secs",
                "sample interval cannot exceed the log interval",
            ));
        }
        if self.backlog_per_tick > self.backlog_capacity {
            errors.push(ValidationError::new(
                "schedule.backlog_per_tick",
                format!(
                    "backlog_per_tick {} exceeds backlog_capacity {}",
                    self.backlog_per_tick, self.backlog_capacity
                ),
            ));
        }

        errors
    }
}

/// Remote telemetry endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether records are pushed to the endpoint at all.
    pub enabled: bool,
    /// Full URL of the REST endpoint.
    pub endpoint: String,
    /// Static headers sent with every request (API key, bearer token).
    pub headers: BTreeMap<String, String>,
    /// Bound on one delivery request, in seconds.
    pub timeout_secs: u64,
    /// Bound on the reachability probe, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            headers: BTreeMap::new(),
            timeout_secs: 5,
            probe_timeout_ms: 500,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.enabled {
            match reqwest::Url::parse(&self.endpoint) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                    if url.host_str().is_none() {
                        errors.push(ValidationError::new(
                            "sync.endpoint",
                            format!("endpoint '{}' has no host", self.endpoint),
                        ));
                    }
                }
                Ok(url) => errors.push(ValidationError::new(
                    "sync.endpoint",
                    format!("unsupported scheme '{}': use http or https", url.scheme()),
                )),
                Err(e) => errors.push(ValidationError::new(
                    "sync.endpoint",
                    format!("invalid endpoint '{}': {}", self.endpoint, e),
                )),
            }
        }

        for (name, value) in &self.headers {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    format!("sync.headers.{}", name),
                    "invalid header name",
                ));
            }
            if reqwest::header::HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::new(
                    format!("sync.headers.{}", name),
                    "invalid header value",
                ));
            }
        }

        if self.timeout_secs == 0 || self.timeout_secs > 30 {
            errors.push(ValidationError::new(
                "sync.timeout_secs",
                format!(
                    "timeout {} must be between 1 and 30 seconds",
                    self.timeout_secs
                ),
            ));
        }
        if self.probe_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "sync.probe_timeout_ms",
                "probe timeout cannot be 0",
            ));
        }

        errors
    }
}

/// Web server toggle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Whether the web server is up when the service starts.
    pub web_enabled_at_start: bool,
    /// Toggle requests closer together than this are ignored.
    pub debounce_ms: u64,
    /// How long in-flight requests may run after the server is told to stop.
    pub shutdown_grace_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            web_enabled_at_start: true,
            debounce_ms: 250,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl ControlConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate control configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.debounce_ms > 5_000 {
            errors.push(ValidationError::new(
                "control.debounce_ms",
                format!("debounce {} is too long (maximum 5000 ms)", self.debounce_ms),
            ));
        }
        if self.shutdown_grace_ms > 30_000 {
            errors.push(ValidationError::new(
                "control.shutdown_grace_ms",
                format!(
                    "shutdown grace {} is too long (maximum 30000 ms)",
                    self.shutdown_grace_ms
                ),
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `sync.endpoint`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("compost")
        .join("monitor.toml")
}
