//! Configuration for the AirGradient exporter.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Device to poll.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Poll loop settings.
    #[serde(default)]
    pub poll: PollConfig,

    /// Handling of labeled metrics.
    #[serde(default)]
    pub labels: LabelConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// AirGradient device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// URL of the device's current measurements endpoint.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "http://airgradient.local/measures/current".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: ":9500", all interfaces).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    ":9500".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl PrometheusConfig {
    /// Resolve the listen address.
    ///
    /// A bare port such as `:9500` binds all IPv4 interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = self.listen.trim();
        let candidate = if listen.starts_with(':') {
            format!("0.0.0.0{}", listen)
        } else {
            listen.to_string()
        };

        candidate
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds to wait after a successful poll before the next one (default: 30).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// What to do after a failed poll.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PollConfig {
    /// Delay after a successful poll.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Delay policy applied after a failed poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Retry right away.
    #[default]
    Immediate,
    /// Wait the same delay after every failure.
    Fixed { delay_ms: u64 },
    /// Double the delay after each consecutive failure, up to `max_ms`.
    Exponential { initial_ms: u64, max_ms: u64 },
}

/// Labeled metric configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelConfig {
    /// What happens to previously seen label values.
    #[serde(default)]
    pub policy: LabelPolicy,
}

/// Treatment of label tuples that are no longer reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPolicy {
    /// Keep every tuple ever observed.
    #[default]
    Accumulate,
    /// Drop old tuples when a new one is observed.
    Replace,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    ///
    /// The result is not validated, so command-line overrides can still be
    /// applied before calling [`ExporterConfig::validate`].
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "measurements url must not be empty".to_string(),
            ));
        }

        match reqwest::Url::parse(&self.device.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Invalid measurements url: {}",
                    self.device.url
                )));
            }
        }

        if self.prometheus.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "listen address must not be empty".to_string(),
            ));
        }
        self.prometheus.listen_addr()?;

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll interval must be > 0".to_string(),
            ));
        }

        match self.poll.retry {
            RetryPolicy::Immediate => {}
            RetryPolicy::Fixed { delay_ms } => {
                if delay_ms == 0 {
                    return Err(ConfigError::Validation(
                        "retry delay must be > 0".to_string(),
                    ));
                }
            }
            RetryPolicy::Exponential { initial_ms, max_ms } => {
                if initial_ms == 0 {
                    return Err(ConfigError::Validation(
                        "initial retry delay must be > 0".to_string(),
                    ));
                }
                if max_ms < initial_ms {
                    return Err(ConfigError::Validation(
                        "max retry delay must be >= initial retry delay".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Parse a duration such as `30s`, `500ms`, `5m` or `1h30m`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`; each
/// component may carry a decimal fraction. A bare `0` is the zero duration.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_secs = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration '{}'", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration '{}'", input)),
            other => {
                return Err(format!(
                    "unknown unit '{}' in duration '{}'",
                    other, input
                ));
            }
        };
        total_secs += value * scale;
        rest = &rest[unit_len..];
    }

    Duration::try_from_secs_f64(total_secs).map_err(|e| format!("invalid duration '{}': {}", input, e))
}
