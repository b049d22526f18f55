//! Event types flowing through the correlation pipeline.
//!
//! A [`PartialEvent`] is what one log source knows about a connection. The
//! correlator merges a gateway partial and a proxy partial into a
//! [`CorrelatedEvent`], which is serialized as a [`CollectorRecord`] for the
//! collector's wire contract.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identity reported for forwarded events that found no gateway partner.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// The log a partial event was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Forward-proxy access log (Squid-style)
    Proxy,

    /// VPN gateway access log (Xray-style)
    Gateway,
}

impl LogSource {
    /// Get the source name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            LogSource::Proxy => "proxy",
            LogSource::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured view of a single log line from one source.
///
/// Fields the source does not carry stay `None`; parsers never substitute
/// defaults for them.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialEvent {
    pub source: LogSource,

    /// Absolute event time, normalized to UTC by the parser
    pub timestamp: DateTime<Utc>,

    /// Proxy user id or gateway-assigned email/uuid
    pub identity: Option<String>,

    pub client_ip: Option<String>,
    pub destination_host: Option<String>,
    pub destination_port: Option<u16>,
    pub status: Option<String>,
    pub bytes_sent: Option<u64>,

    /// Original text, retained for diagnostics and audit
    pub raw_line: String,
}

impl PartialEvent {
    /// Create an event carrying only its source, time and raw line.
    pub fn new(source: LogSource, timestamp: DateTime<Utc>, raw_line: impl Into<String>) -> Self {
        Self {
            source,
            timestamp,
            identity: None,
            client_ip: None,
            destination_host: None,
            destination_port: None,
            status: None,
            bytes_sent: None,
            raw_line: raw_line.into(),
        }
    }

    /// An event without identity and client IP has nothing to match on.
    pub fn is_correlatable(&self) -> bool {
        self.identity.is_some() || self.client_ip.is_some()
    }

    /// Destination rendered as `host[:port]`.
    pub fn destination(&self) -> Option<String> {
        let host = self.destination_host.as_deref()?;
        Some(match self.destination_port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// The merged, identity-enriched record sent downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedEvent {
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    pub client_ip: Option<String>,

    /// `host[:port]`
    pub destination: String,
    pub status: Option<String>,
    pub bytes_sent: Option<u64>,
    pub raw_log: String,
    pub origin_host: String,
}

impl CorrelatedEvent {
    /// Merge a gateway partial with the proxy partial it was matched to.
    ///
    /// Identity comes from the gateway side (falling back to the proxy's own),
    /// network fields from the proxy side. Returns `None` when the merged
    /// event would lack an identity or a destination.
    pub fn merge(gateway: &PartialEvent, proxy: &PartialEvent, origin_host: &str) -> Option<Self> {
        let identity = gateway
            .identity
            .clone()
            .or_else(|| proxy.identity.clone())
            .filter(|id| !id.is_empty())?;
        let destination = proxy.destination().or_else(|| gateway.destination())?;

        Some(Self {
            timestamp: gateway.timestamp.max(proxy.timestamp),
            identity,
            client_ip: proxy.client_ip.clone().or_else(|| gateway.client_ip.clone()),
            destination,
            status: proxy.status.clone(),
            bytes_sent: proxy.bytes_sent,
            raw_log: format!("{}\n{}", gateway.raw_line, proxy.raw_line),
            origin_host: origin_host.to_string(),
        })
    }

    /// Build an event for a proxy partial that found no gateway partner.
    ///
    /// Keeps the proxy's own identity when it has one, otherwise reports
    /// [`UNKNOWN_IDENTITY`].
    pub fn unmatched(proxy: &PartialEvent, origin_host: &str) -> Option<Self> {
        let destination = proxy.destination()?;
        let identity = proxy
            .identity
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

        Some(Self {
            timestamp: proxy.timestamp,
            identity,
            client_ip: proxy.client_ip.clone(),
            destination,
            status: proxy.status.clone(),
            bytes_sent: proxy.bytes_sent,
            raw_log: proxy.raw_line.clone(),
            origin_host: origin_host.to_string(),
        })
    }

    /// Flatten into the collector's wire record.
    pub fn to_record(&self) -> CollectorRecord {
        CollectorRecord {
            uuid: self.identity.clone(),
            ip: self.client_ip.clone(),
            destination: self.destination.clone(),
            raw_log: self.raw_log.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            status: self.status.clone(),
            bytes_sent: self.bytes_sent,
            server_ip: self.origin_host.clone(),
        }
    }
}

/// JSON body accepted by the collector endpoint.
///
/// Absent values are omitted from the payload rather than sent as defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRecord {
    pub uuid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    pub destination: String,
    pub raw_log: String,

    /// ISO-8601, UTC
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,

    pub server_ip: String,
}
