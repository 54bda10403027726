//! Proxy Vet - concurrent proxy verification with rolling statistics
//!
//! Candidates are aggregated from list sources, verified in chunks under a
//! concurrency cap (liveness, anonymity, protocols, geolocation) and the
//! survivors are upserted into a SQLite statistics store that can be queried
//! by country, latency, anonymity and protocol.

pub mod config;
pub mod database;
pub mod error;
pub mod periodic;
pub mod pipeline;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod session;

pub use config::Config;
pub use database::{ProxyFilter, StatisticsStore, UpsertSummary};
pub use error::{Error, Result};
pub use periodic::{PeriodicScan, PeriodicStats};
pub use pipeline::{ScanPipeline, ScanReport};
pub use proxy::*;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use scheduler::{ChunkProgress, Scheduler};
pub use session::{ScanSession, SessionBlacklist};

/// Install the global tracing subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_logger() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();
}
