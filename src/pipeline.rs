//! One full scan: aggregate candidates, verify them in chunks, persist survivors

use crate::config::Config;
use crate::database::StatisticsStore;
use crate::proxy::checker::{ProxyTransport, ReqwestTransport, Verifier, VerifierConfig};
use crate::proxy::crawler::SourceAggregator;
use crate::scheduler::Scheduler;
use crate::session::ScanSession;
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// What a scan found and kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Unique candidates after aggregation
    pub candidates: usize,
    /// Verified and not blacklisted
    pub verified: usize,
    pub persisted: usize,
    pub persistence_failures: usize,
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates, {} verified, {} persisted, {} persistence failures",
            self.candidates, self.verified, self.persisted, self.persistence_failures
        )
    }
}

/// Aggregator, verifier settings and store for repeated scans.
///
/// Each `run` gets its own `ScanSession`, so enrichment caching and the
/// blacklist never leak between scans.
pub struct ScanPipeline {
    aggregator: SourceAggregator,
    transport: Arc<dyn ProxyTransport>,
    verifier_config: VerifierConfig,
    store: StatisticsStore,
    sources: Vec<String>,
    chunk_size: usize,
    max_concurrent: usize,
}

impl ScanPipeline {
    pub fn new(
        config: &Config,
        aggregator: SourceAggregator,
        transport: Arc<dyn ProxyTransport>,
        store: StatisticsStore,
    ) -> Self {
        Self {
            aggregator,
            transport,
            verifier_config: config.verifier_config(),
            store,
            sources: config.proxy_source_urls.clone(),
            chunk_size: config.chunk_size,
            max_concurrent: config.max_concurrent_checks,
        }
    }

    /// Pipeline talking to the real network
    pub fn from_config(config: &Config, store: StatisticsStore) -> Self {
        Self::new(
            config,
            SourceAggregator::http(config.crawler_config()),
            Arc::new(ReqwestTransport::new()),
            store,
        )
    }

    pub fn store(&self) -> &StatisticsStore {
        &self.store
    }

    /// Run one scan. Fails only when aggregation fails after its retries;
    /// no candidates is an empty report.
    pub async fn run(&self, session: &ScanSession) -> Result<ScanReport> {
        let candidates = self.aggregator.fetch_candidates(&self.sources).await?;
        if candidates.is_empty() {
            info!("No candidates found, nothing to verify");
            return Ok(ScanReport::default());
        }

        let mut report = ScanReport {
            candidates: candidates.len(),
            ..ScanReport::default()
        };

        let verifier = Verifier::new(
            self.verifier_config.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&session.cache),
        );
        let scheduler = Scheduler::new(Arc::new(verifier), self.chunk_size, self.max_concurrent)?;

        let results = scheduler.scan_all(candidates, session).await;
        report.verified = results.len();

        let summary = self.store.upsert_all(&results).await;
        report.persisted = summary.persisted;
        report.persistence_failures = summary.failed;

        info!("Scan finished: {}", report);
        Ok(report)
    }
}
