//! Proxy Log Forwarder Library
//!
//! This library provides components for correlating proxy and VPN gateway
//! access logs and forwarding the result to a collector:
//!
//! - **config**: Environment-based configuration for the forwarder
//! - **tail**: Tail readers for growing log files and log commands
//! - **parser**: Line parsers turning raw log lines into partial events
//! - **event**: Partial, correlated and wire-format event types
//! - **cache**: Bounded, time-indexed store of gateway events
//! - **correlator**: Merges gateway and proxy events within a time window
//! - **client**: HTTP client for the collector endpoint
//! - **forwarder**: Delivery task with retry buffer and dead letters
//! - **pipeline**: Lifecycle controller wiring everything together
//! - **stats**: Pipeline counters
//! - **host**: Origin host detection
//!
//! # Example
//!
//! ```no_run
//! use proxylog_forwarder::config::Config;
//! use proxylog_forwarder::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Build and start the pipeline
//!     let pipeline = Pipeline::new(config).expect("Failed to build pipeline");
//!     pipeline.start().await;
//!
//!     // Run until interrupted
//!     tokio::signal::ctrl_c().await.ok();
//!     pipeline.stop().await;
//! }
//! ```

// Module declarations
pub mod cache;
pub mod client;
pub mod config;
pub mod correlator;
pub mod event;
pub mod forwarder;
pub mod host;
pub mod parser;
pub mod pipeline;
pub mod stats;
pub mod tail;

// Re-export commonly used types at crate root for convenience
pub use cache::{CacheKey, CorrelationCache};
pub use client::{ClientError, CollectorClient, DeliveryOutcome};
pub use config::{Config, ConfigError, MatchPolicy, UnmatchedPolicy};
pub use correlator::{Correlator, CorrelatorSettings};
pub use event::{CollectorRecord, CorrelatedEvent, LogSource, PartialEvent};
pub use forwarder::{DeadLetterSink, Forwarder, ForwarderConfig};
pub use parser::{LineParser, ParseError, ProxyLogFormat};
pub use pipeline::{Pipeline, PipelineError, PipelineState};
pub use stats::{PipelineStats, StatsSnapshot};
pub use tail::{SourceSpec, TailReader, TailSettings};
