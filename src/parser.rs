//! Line parsers for the proxy and gateway access logs.
//!
//! Parsing is pure: a raw line goes in, a [`PartialEvent`] or a
//! [`ParseError`] comes out. Failures are routine (banner lines, other log
//! kinds interleaved in the same file) and callers count and drop them.

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::config::Config;
use crate::event::{LogSource, PartialEvent};

/// `unix_timestamp client_ip identity method host:port status [bytes]`
const COMPACT_MIN_FIELDS: usize = 6;

/// `timestamp elapsed client result/status bytes method url [user ...]`
const SQUID_MIN_FIELDS: usize = 7;

/// Xray-style access line, e.g.
/// `2025/05/19 17:38:25 from 81.162.252.10:53312 accepted tcp:example.com:443 [vless-in -> direct] email: abc-123`
const GATEWAY_PATTERN: &str = r"^(?P<ts>\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?) from (?:(?:tcp|udp):)?(?P<ip>\S+):\d+ accepted (?:tcp|udp):(?P<host>\S+):(?P<port>\d+)(?:\s.*)? email: (?P<email>\S+)\s*$";

const GATEWAY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

/// Field layout of the proxy access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyLogFormat {
    /// `unix_timestamp client_ip identity method host:port status [bytes]`
    #[default]
    Compact,

    /// Squid's native access.log layout
    Squid,
}

impl FromStr for ProxyLogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(ProxyLogFormat::Compact),
            "squid" => Ok(ProxyLogFormat::Squid),
            other => Err(format!("unknown proxy log format '{}'", other)),
        }
    }
}

/// Why a line could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line has fewer whitespace-separated fields than the layout requires
    TooFewFields { found: usize, required: usize },

    /// Timestamp field is not in the source's time format
    InvalidTimestamp(String),

    /// Line does not match the gateway access pattern
    PatternMismatch,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::TooFewFields { found, required } => {
                write!(f, "expected at least {} fields, found {}", required, found)
            }
            ParseError::InvalidTimestamp(raw) => write!(f, "invalid timestamp '{}'", raw),
            ParseError::PatternMismatch => write!(f, "line does not match the access pattern"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parser settings for both sources.
#[derive(Debug, Clone)]
pub struct LineParser {
    proxy_format: ProxyLogFormat,

    /// `None` reads gateway timestamps in the host's local zone
    gateway_offset: Option<FixedOffset>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self {
            proxy_format: ProxyLogFormat::Compact,
            gateway_offset: None,
        }
    }
}

impl LineParser {
    pub fn new(proxy_format: ProxyLogFormat, gateway_offset: Option<FixedOffset>) -> Self {
        Self {
            proxy_format,
            gateway_offset,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.proxy_format, config.gateway_utc_offset)
    }

    /// Parse one raw line from the given source.
    pub fn parse(&self, raw_line: &str, source: LogSource) -> Result<PartialEvent, ParseError> {
        match source {
            LogSource::Proxy => parse_proxy_line(raw_line, self.proxy_format),
            LogSource::Gateway => match self.gateway_offset {
                Some(offset) => parse_gateway_line(raw_line, offset),
                None => parse_gateway_line(raw_line, Local),
            },
        }
    }
}

/// Parse a proxy access line in the given layout.
pub fn parse_proxy_line(line: &str, format: ProxyLogFormat) -> Result<PartialEvent, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split_whitespace().collect();

    match format {
        ProxyLogFormat::Compact => parse_compact(line, &fields),
        ProxyLogFormat::Squid => parse_squid(line, &fields),
    }
}

fn parse_compact(line: &str, fields: &[&str]) -> Result<PartialEvent, ParseError> {
    require_fields(fields, COMPACT_MIN_FIELDS)?;

    let timestamp = parse_epoch_timestamp(fields[0])
        .ok_or_else(|| ParseError::InvalidTimestamp(fields[0].to_string()))?;
    let (host, port) = split_host_port(fields[4]);

    let mut event = PartialEvent::new(LogSource::Proxy, timestamp, line);
    event.client_ip = present(fields[1]);
    event.identity = normalize_identity(fields[2]);
    event.destination_host = host;
    event.destination_port = port.and_then(|p| p.parse().ok());
    event.status = present(fields[5]).map(|s| status_code(&s).to_string());
    event.bytes_sent = fields.get(6).and_then(|b| b.parse().ok());
    Ok(event)
}

fn parse_squid(line: &str, fields: &[&str]) -> Result<PartialEvent, ParseError> {
    require_fields(fields, SQUID_MIN_FIELDS)?;

    let timestamp = parse_epoch_timestamp(fields[0])
        .ok_or_else(|| ParseError::InvalidTimestamp(fields[0].to_string()))?;
    let (host, port) = split_url(fields[6]);

    let mut event = PartialEvent::new(LogSource::Proxy, timestamp, line);
    event.client_ip = present(fields[2]);
    event.identity = fields.get(7).and_then(|user| normalize_identity(user));
    event.destination_host = host;
    event.destination_port = port;
    event.status = present(fields[3]).map(|s| status_code(&s).to_string());
    event.bytes_sent = fields[4].parse().ok();
    Ok(event)
}

/// Parse a gateway access line; timestamps are read in `zone`.
///
/// A local time that falls in a DST fold resolves to its earlier instant.
pub fn parse_gateway_line<Tz: TimeZone>(line: &str, zone: Tz) -> Result<PartialEvent, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let captures = gateway_pattern()
        .captures(line)
        .ok_or(ParseError::PatternMismatch)?;

    let ts = &captures["ts"];
    let timestamp = NaiveDateTime::parse_from_str(ts, GATEWAY_TIME_FORMAT)
        .ok()
        .and_then(|naive| zone.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ParseError::InvalidTimestamp(ts.to_string()))?;

    let mut event = PartialEvent::new(LogSource::Gateway, timestamp, line);
    event.identity = normalize_identity(&captures["email"]);
    event.client_ip = present(captures["ip"].trim_matches(['[', ']']));
    event.destination_host = present(captures["host"].trim_matches(['[', ']']));
    event.destination_port = captures["port"].parse().ok();
    Ok(event)
}

/// Parse a fractional Unix epoch such as `1747585954.066`.
///
/// The fraction is read digit-exact (up to nanoseconds) instead of through
/// a float.
pub fn parse_epoch_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let digits = &frac[..frac.len().min(9)];
        digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
    };
    DateTime::from_timestamp(secs, nanos)
}

/// Canonicalize an identity.
///
/// The gateway assigns emails of the form `<uuid>@<tag>`; those, and bare
/// UUIDs, become the lowercase hyphenated UUID. Anything else is kept
/// verbatim. Empty and `-` mean "no identity".
pub fn normalize_identity(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }

    let local = trimmed.split_once('@').map_or(trimmed, |(local, _)| local);
    match Uuid::parse_str(local) {
        Ok(uuid) => Some(uuid.hyphenated().to_string()),
        Err(_) => Some(trimmed.to_string()),
    }
}

#[allow(clippy::expect_used)]
fn gateway_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(GATEWAY_PATTERN).expect("gateway pattern compiles"))
}

fn require_fields(fields: &[&str], required: usize) -> Result<(), ParseError> {
    if fields.len() < required {
        return Err(ParseError::TooFewFields {
            found: fields.len(),
            required,
        });
    }
    Ok(())
}

/// `-` is the access-log placeholder for "no value".
fn present(field: &str) -> Option<String> {
    match field {
        "" | "-" => None,
        value => Some(value.to_string()),
    }
}

/// `TCP_TUNNEL/200` -> `200`; a bare code is returned unchanged.
fn status_code(field: &str) -> &str {
    field.rsplit_once('/').map_or(field, |(_, code)| code)
}

/// Split `host:port` into the host and the raw (unparsed) port text.
fn split_host_port(target: &str) -> (Option<String>, Option<&str>) {
    if target.is_empty() || target == "-" {
        return (None, None);
    }

    if let Some(rest) = target.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            return (present(host), tail.strip_prefix(':'));
        }
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            (Some(host.to_string()), Some(port))
        }
        _ => (Some(target.to_string()), None),
    }
}

/// Destination of a Squid request URL: `host:port` for CONNECT, or an
/// absolute `scheme://host[:port]/path`.
fn split_url(url: &str) -> (Option<String>, Option<u16>) {
    let Some((scheme, rest)) = url.split_once("://") else {
        let (host, port) = split_host_port(url);
        return (host, port.and_then(|p| p.parse().ok()));
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    let (host, port) = split_host_port(authority);
    let port = match port {
        Some(raw) => raw.parse().ok(),
        None => default_port(scheme),
    };
    (host, port)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}
