//! Origin host detection.
//!
//! Every forwarded event carries the identity of the machine that produced
//! it. The value is resolved on first use and cached for the lifetime of the
//! process.

use std::env;
use std::sync::OnceLock;

use tracing::{info, warn};

static ORIGIN_HOST: OnceLock<String> = OnceLock::new();

/// The cached origin host.
///
/// The first call resolves it (see [`resolve_origin_host`]); `configured` is
/// ignored on every later call.
pub fn origin_host(configured: Option<&str>) -> &'static str {
    ORIGIN_HOST.get_or_init(|| {
        let host = resolve_origin_host(configured);
        info!(origin_host = %host, "Resolved origin host");
        host
    })
}

/// Resolve the origin host without caching.
///
/// Tries, in order:
/// 1. the configured value (`PROXYLOG_SERVER_IP`)
/// 2. the `HOSTNAME` environment variable
/// 3. the system hostname
/// 4. `"unknown"`
pub fn resolve_origin_host(configured: Option<&str>) -> String {
    resolve_with(configured, |key| env::var(key).ok())
}

fn resolve_with<F>(configured: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = configured.map(str::trim).filter(|h| !h.is_empty()) {
        return host.to_string();
    }

    if let Some(host) = lookup("HOSTNAME").filter(|h| !h.trim().is_empty()) {
        return host.trim().to_string();
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(host) = hostname.to_str().filter(|h| !h.is_empty()) {
                return host.to_string();
            }
        }
        Err(e) => warn!("Failed to get system hostname: {}", e),
    }

    warn!("Could not determine origin host, using 'unknown'");
    "unknown".to_string()
}
