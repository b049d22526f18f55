//! Configuration module for the proxy log forwarder.
//!
//! This module provides environment-based configuration: where each log
//! comes from, how lines are parsed, how events are correlated and where
//! they are delivered.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::parser::ProxyLogFormat;
use crate::tail::SourceSpec;

/// Default proxy access log
const DEFAULT_PROXY_LOG_PATH: &str = "/var/log/squid/access.log";

/// Default gateway access log
const DEFAULT_GATEWAY_LOG_PATH: &str = "/var/log/xray/access.log";

/// Default collector endpoint
const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8000/api/v1/proxylog/";

const DEFAULT_SUCCESS_STATUS: u16 = 200;
const DEFAULT_CORRELATION_WINDOW_SECS: u64 = 5;
const DEFAULT_CACHE_CAPACITY: usize = crate::cache::DEFAULT_CACHE_CAPACITY;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_FILE_WAIT_INTERVAL_SECS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BUFFER_CAPACITY: usize = 500;
const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// What happens to a proxy event that never finds a gateway partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    /// Log and drop it
    #[default]
    Drop,

    /// Forward it with identity `unknown`
    ForwardUnknown,
}

impl FromStr for UnmatchedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(UnmatchedPolicy::Drop),
            "unknown" | "forward" => Ok(UnmatchedPolicy::ForwardUnknown),
            other => Err(format!("unknown unmatched policy '{}'", other)),
        }
    }
}

/// What happens to a gateway entry once it has matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Remove it; it matches at most one proxy event
    #[default]
    Consume,

    /// Keep it as an identity side table until evicted
    Retain,
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consume" => Ok(MatchPolicy::Consume),
            "retain" => Ok(MatchPolicy::Retain),
            other => Err(format!("unknown match policy '{}'", other)),
        }
    }
}

/// Configuration for the forwarder service.
///
/// All settings can be configured via `PROXYLOG_*` environment variables;
/// see [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_source: SourceSpec,
    pub proxy_format: ProxyLogFormat,
    pub gateway_source: SourceSpec,

    /// UTC offset of the gateway's zone-less timestamps; `None` reads them
    /// in the host's local zone
    pub gateway_utc_offset: Option<FixedOffset>,

    /// Full collector endpoint URL
    pub collector_url: String,

    /// The one response status counted as a successful delivery
    pub success_status: u16,

    /// Maximum time difference between matching events
    pub correlation_window: Duration,

    pub cache_capacity: usize,
    pub cache_ttl: Duration,

    /// Idle suspension of the tail readers
    pub poll_interval: Duration,

    /// Retry interval while a source is missing
    pub file_wait_interval: Duration,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of delivery retries per event
    pub max_retries: u32,

    pub retry_buffer_capacity: usize,

    /// Capacity of the correlator to forwarder queue
    pub queue_capacity: usize,

    pub unmatched_policy: UnmatchedPolicy,
    pub match_policy: MatchPolicy,

    /// JSON-lines file for undeliverable events
    pub dead_letter_path: Option<PathBuf>,

    /// Overrides the detected origin host
    pub origin_host: Option<String>,

    /// Bound on each wait during shutdown
    pub shutdown_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PROXYLOG_PROXY_LOG_PATH` | `/var/log/squid/access.log` |
    /// | `PROXYLOG_PROXY_COMMAND` | unset (tail the file) |
    /// | `PROXYLOG_PROXY_FORMAT` | `compact` |
    /// | `PROXYLOG_GATEWAY_LOG_PATH` | `/var/log/xray/access.log` |
    /// | `PROXYLOG_GATEWAY_COMMAND` | unset (tail the file) |
    /// | `PROXYLOG_GATEWAY_UTC_OFFSET` | `+00:00` |
    /// | `PROXYLOG_COLLECTOR_URL` | `http://localhost:8000/api/v1/proxylog/` |
    /// | `PROXYLOG_COLLECTOR_SUCCESS_STATUS` | `200` |
    /// | `PROXYLOG_CORRELATION_WINDOW_SECS` | `5` |
    /// | `PROXYLOG_CACHE_CAPACITY` | `1000` |
    /// | `PROXYLOG_CACHE_TTL_SECS` | `300` |
    /// | `PROXYLOG_POLL_INTERVAL_MS` | `250` |
    /// | `PROXYLOG_FILE_WAIT_INTERVAL_SECS` | `2` |
    /// | `PROXYLOG_REQUEST_TIMEOUT_SECS` | `10` |
    /// | `PROXYLOG_MAX_RETRIES` | `3` |
    /// | `PROXYLOG_RETRY_BUFFER_CAPACITY` | `500` |
    /// | `PROXYLOG_QUEUE_CAPACITY` | `1000` |
    /// | `PROXYLOG_UNMATCHED_POLICY` | `drop` |
    /// | `PROXYLOG_MATCH_POLICY` | `consume` |
    /// | `PROXYLOG_DEAD_LETTER_PATH` | unset |
    /// | `PROXYLOG_SERVER_IP` | unset (detected) |
    /// | `PROXYLOG_SHUTDOWN_TIMEOUT_SECS` | `10` |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the variable if a value is malformed or
    /// out of bounds, or if the collector URL is not an absolute http(s) URL.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use proxylog_forwarder::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Collector: {}", config.collector_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let proxy_source = source_from(
            get("PROXYLOG_PROXY_COMMAND"),
            get("PROXYLOG_PROXY_LOG_PATH"),
            DEFAULT_PROXY_LOG_PATH,
            "PROXYLOG_PROXY_COMMAND",
        )?;
        let gateway_source = source_from(
            get("PROXYLOG_GATEWAY_COMMAND"),
            get("PROXYLOG_GATEWAY_LOG_PATH"),
            DEFAULT_GATEWAY_LOG_PATH,
            "PROXYLOG_GATEWAY_COMMAND",
        )?;

        let proxy_format = parse_enum(get("PROXYLOG_PROXY_FORMAT"), "PROXYLOG_PROXY_FORMAT")?;

        let gateway_utc_offset = match get("PROXYLOG_GATEWAY_UTC_OFFSET") {
            Some(value) if value.trim().eq_ignore_ascii_case("local") => None,
            Some(value) => Some(parse_utc_offset(&value).ok_or_else(|| {
                ConfigError::for_var(
                    "PROXYLOG_GATEWAY_UTC_OFFSET",
                    format!("'{}' is not an offset like +03:00 or 'local'", value),
                )
            })?),
            None => None,
        };

        let collector_url = validate_collector_url(
            &get("PROXYLOG_COLLECTOR_URL").unwrap_or_else(|| DEFAULT_COLLECTOR_URL.to_string()),
        )?;

        let success_status = parse_bounded(
            get("PROXYLOG_COLLECTOR_SUCCESS_STATUS"),
            "PROXYLOG_COLLECTOR_SUCCESS_STATUS",
            DEFAULT_SUCCESS_STATUS,
            100,
            599,
        )?;

        let window_secs = parse_bounded(
            get("PROXYLOG_CORRELATION_WINDOW_SECS"),
            "PROXYLOG_CORRELATION_WINDOW_SECS",
            DEFAULT_CORRELATION_WINDOW_SECS,
            1,
            300,
        )?;
        let cache_capacity = parse_bounded(
            get("PROXYLOG_CACHE_CAPACITY"),
            "PROXYLOG_CACHE_CAPACITY",
            DEFAULT_CACHE_CAPACITY,
            1,
            1_000_000,
        )?;
        let cache_ttl_secs = parse_bounded(
            get("PROXYLOG_CACHE_TTL_SECS"),
            "PROXYLOG_CACHE_TTL_SECS",
            DEFAULT_CACHE_TTL_SECS,
            1,
            86_400,
        )?;
        let poll_interval_ms = parse_bounded(
            get("PROXYLOG_POLL_INTERVAL_MS"),
            "PROXYLOG_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            10,
            5_000,
        )?;
        let file_wait_secs = parse_bounded(
            get("PROXYLOG_FILE_WAIT_INTERVAL_SECS"),
            "PROXYLOG_FILE_WAIT_INTERVAL_SECS",
            DEFAULT_FILE_WAIT_INTERVAL_SECS,
            1,
            60,
        )?;
        let request_timeout_secs = parse_bounded(
            get("PROXYLOG_REQUEST_TIMEOUT_SECS"),
            "PROXYLOG_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            120,
        )?;
        let max_retries = parse_bounded(
            get("PROXYLOG_MAX_RETRIES"),
            "PROXYLOG_MAX_RETRIES",
            DEFAULT_MAX_RETRIES,
            0,
            20,
        )?;
        let retry_buffer_capacity = parse_bounded(
            get("PROXYLOG_RETRY_BUFFER_CAPACITY"),
            "PROXYLOG_RETRY_BUFFER_CAPACITY",
            DEFAULT_RETRY_BUFFER_CAPACITY,
            1,
            100_000,
        )?;
        let queue_capacity = parse_bounded(
            get("PROXYLOG_QUEUE_CAPACITY"),
            "PROXYLOG_QUEUE_CAPACITY",
            DEFAULT_QUEUE_CAPACITY,
            1,
            100_000,
        )?;
        let shutdown_timeout_secs = parse_bounded(
            get("PROXYLOG_SHUTDOWN_TIMEOUT_SECS"),
            "PROXYLOG_SHUTDOWN_TIMEOUT_SECS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            1,
            300,
        )?;

        let unmatched_policy = parse_enum(get("PROXYLOG_UNMATCHED_POLICY"), "PROXYLOG_UNMATCHED_POLICY")?;
        let match_policy = parse_enum(get("PROXYLOG_MATCH_POLICY"), "PROXYLOG_MATCH_POLICY")?;

        Ok(Self {
            proxy_source,
            proxy_format,
            gateway_source,
            gateway_utc_offset,
            collector_url,
            success_status,
            correlation_window: Duration::from_secs(window_secs),
            cache_capacity,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            file_wait_interval: Duration::from_secs(file_wait_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_retries,
            retry_buffer_capacity,
            queue_capacity,
            unmatched_policy,
            match_policy,
            dead_letter_path: get("PROXYLOG_DEAD_LETTER_PATH").map(PathBuf::from),
            origin_host: get("PROXYLOG_SERVER_IP").map(|v| v.trim().to_string()),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        })
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            proxy_source: SourceSpec::File(PathBuf::from(DEFAULT_PROXY_LOG_PATH)),
            proxy_format: ProxyLogFormat::Compact,
            gateway_source: SourceSpec::File(PathBuf::from(DEFAULT_GATEWAY_LOG_PATH)),
            gateway_utc_offset: None,
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            success_status: DEFAULT_SUCCESS_STATUS,
            correlation_window: Duration::from_secs(DEFAULT_CORRELATION_WINDOW_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            file_wait_interval: Duration::from_secs(DEFAULT_FILE_WAIT_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_buffer_capacity: DEFAULT_RETRY_BUFFER_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            unmatched_policy: UnmatchedPolicy::Drop,
            match_policy: MatchPolicy::Consume,
            dead_letter_path: None,
            origin_host: None,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

/// Parse a numeric variable with bounds validation.
fn parse_bounded<T>(value: Option<String>, env_var: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = value else {
        return Ok(default);
    };

    let parsed: T = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value)))?;

    if parsed < min {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} is below minimum ({})", parsed, min),
        ));
    }
    if parsed > max {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} exceeds maximum ({})", parsed, max),
        ));
    }
    Ok(parsed)
}

fn parse_enum<T>(value: Option<String>, env_var: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String> + Default,
{
    match value {
        Some(value) => value.parse().map_err(|e: String| ConfigError::for_var(env_var, e)),
        None => Ok(T::default()),
    }
}

/// A command, when given, takes precedence over the file path.
fn source_from(
    command: Option<String>,
    path: Option<String>,
    default_path: &str,
    command_var: &str,
) -> Result<SourceSpec, ConfigError> {
    match command {
        Some(command) => SourceSpec::command_from_str(&command)
            .ok_or_else(|| ConfigError::for_var(command_var, "command is empty")),
        None => Ok(SourceSpec::File(PathBuf::from(
            path.unwrap_or_else(|| default_path.to_string()),
        ))),
    }
}

/// The collector URL must be an absolute http(s) URL; a bad one is fatal at
/// startup rather than failing every delivery.
fn validate_collector_url(raw: &str) -> Result<String, ConfigError> {
    let env_var = "PROXYLOG_COLLECTOR_URL";
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| ConfigError::for_var(env_var, format!("'{}' is not a valid URL: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::for_var(
                env_var,
                format!("unsupported scheme '{}', expected http or https", other),
            ))
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::for_var(env_var, format!("'{}' has no host", raw)));
    }
    Ok(url.to_string())
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collector_url, "http://localhost:8000/api/v1/proxylog/");
        assert_eq!(config.correlation_window, Duration::from_secs(5));
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.unmatched_policy, UnmatchedPolicy::Drop);
        assert_eq!(config.match_policy, MatchPolicy::Consume);
    }

    #[test]
    fn test_config_from_lookup_with_defaults() {
        let config = load(&[]).expect("Should load with defaults");
        assert_eq!(
            config.proxy_source,
            SourceSpec::File(PathBuf::from("/var/log/squid/access.log"))
        );
        assert_eq!(
            config.gateway_source,
            SourceSpec::File(PathBuf::from("/var/log/xray/access.log"))
        );
        assert_eq!(config.success_status, 200);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.gateway_utc_offset.is_none());
        assert!(config.dead_letter_path.is_none());
    }

    #[test]
    fn test_config_custom_values() {
        let config = load(&[
            ("PROXYLOG_PROXY_LOG_PATH", "/tmp/proxy.log"),
            ("PROXYLOG_PROXY_FORMAT", "squid"),
            ("PROXYLOG_GATEWAY_COMMAND", "docker logs -f --tail 0 xray"),
            ("PROXYLOG_GATEWAY_UTC_OFFSET", "+03:00"),
            ("PROXYLOG_COLLECTOR_URL", "https://collector.example/api/v1/proxylog/"),
            ("PROXYLOG_COLLECTOR_SUCCESS_STATUS", "201"),
            ("PROXYLOG_CORRELATION_WINDOW_SECS", "10"),
            ("PROXYLOG_CACHE_CAPACITY", "50"),
            ("PROXYLOG_UNMATCHED_POLICY", "unknown"),
            ("PROXYLOG_MATCH_POLICY", "retain"),
            ("PROXYLOG_DEAD_LETTER_PATH", "/tmp/dead.jsonl"),
            ("PROXYLOG_SERVER_IP", "203.0.113.7"),
        ])
        .expect("Should load custom values");

        assert_eq!(config.proxy_source, SourceSpec::File(PathBuf::from("/tmp/proxy.log")));
        assert_eq!(config.proxy_format, ProxyLogFormat::Squid);
        assert_eq!(
            config.gateway_source,
            SourceSpec::Command {
                program: "docker".to_string(),
                args: vec!["logs", "-f", "--tail", "0", "xray"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }
        );
        assert_eq!(config.gateway_utc_offset.map(|o| o.local_minus_utc()), Some(3 * 3600));
        assert_eq!(config.collector_url, "https://collector.example/api/v1/proxylog/");
        assert_eq!(config.success_status, 201);
        assert_eq!(config.correlation_window, Duration::from_secs(10));
        assert_eq!(config.cache_capacity, 50);
        assert_eq!(config.unmatched_policy, UnmatchedPolicy::ForwardUnknown);
        assert_eq!(config.match_policy, MatchPolicy::Retain);
        assert_eq!(config.dead_letter_path, Some(PathBuf::from("/tmp/dead.jsonl")));
        assert_eq!(config.origin_host.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("PROXYLOG_CACHE_CAPACITY", "lots")]).unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("PROXYLOG_CACHE_CAPACITY"));
    }

    #[test]
    fn test_window_bounds() {
        let err = load(&[("PROXYLOG_CORRELATION_WINDOW_SECS", "0")]).unwrap_err();
        assert!(err.message.contains("below minimum"));

        let err = load(&[("PROXYLOG_CORRELATION_WINDOW_SECS", "9999")]).unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_malformed_collector_url_is_fatal() {
        let err = load(&[("PROXYLOG_COLLECTOR_URL", "not a url")]).unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("PROXYLOG_COLLECTOR_URL"));

        let err = load(&[("PROXYLOG_COLLECTOR_URL", "ftp://collector.example/")]).unwrap_err();
        assert!(err.message.contains("unsupported scheme"));
    }

    #[test]
    fn test_unknown_policy() {
        let err = load(&[("PROXYLOG_UNMATCHED_POLICY", "maybe")]).unwrap_err();
        assert!(err.message.contains("unknown unmatched policy"));
    }

    #[test]
    fn test_local_offset_keyword() {
        let config = load(&[("PROXYLOG_GATEWAY_UTC_OFFSET", "local")]).unwrap();
        assert!(config.gateway_utc_offset.is_none());

        let config = load(&[("PROXYLOG_GATEWAY_UTC_OFFSET", "+00:00")]).unwrap();
        assert_eq!(config.gateway_utc_offset.map(|o| o.local_minus_utc()), Some(0));
    }

    #[test]
    fn test_bad_offset() {
        let err = load(&[("PROXYLOG_GATEWAY_UTC_OFFSET", "CET")]).unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("PROXYLOG_GATEWAY_UTC_OFFSET"));
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+01:00").unwrap().local_minus_utc(), 3600);
        assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(parse_utc_offset("+09").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("01:00").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(format!("{}", error), "Configuration error for TEST_VAR: test error");

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(format!("{}", error_no_var), "Configuration error: general error");
    }
}
