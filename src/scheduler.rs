//! Chunked semaphore pool driving the verifier over a candidate set

use crate::proxy::checker::CandidateVerifier;
use crate::proxy::models::VerificationResult;
use crate::session::ScanSession;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 1000;

/// Progress reported after each finished chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub completed: usize,
    pub total: usize,
}

impl fmt::Display for ChunkProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

pub type ProgressCallback = Arc<dyn Fn(ChunkProgress) + Send + Sync>;

/// Sort candidates into a fixed order and split them into contiguous chunks
pub fn plan_chunks(candidates: HashSet<String>, chunk_size: usize) -> Vec<Vec<String>> {
    let mut ordered: Vec<String> = candidates.into_iter().collect();
    ordered.sort();
    ordered
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct Scheduler {
    verifier: Arc<dyn CandidateVerifier>,
    chunk_size: usize,
    max_concurrent: usize,
    progress: Option<ProgressCallback>,
}

impl Scheduler {
    pub fn new(
        verifier: Arc<dyn CandidateVerifier>,
        chunk_size: usize,
        max_concurrent: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be at least 1".into()));
        }
        if max_concurrent == 0 {
            return Err(Error::Configuration(
                "max_concurrent_checks must be at least 1".into(),
            ));
        }
        Ok(Self {
            verifier,
            chunk_size,
            max_concurrent,
            progress: None,
        })
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ChunkProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Verify every candidate, one chunk at a time.
    ///
    /// Within a chunk at most `max_concurrent` verifications are in flight and
    /// results arrive unordered. A chunk finishes completely before the next
    /// starts. Failed candidates and blacklisted addresses are dropped.
    /// Cancelling the session stops the scan before the next chunk and
    /// returns what was collected so far.
    pub async fn scan_all(
        &self,
        candidates: HashSet<String>,
        session: &ScanSession,
    ) -> Vec<VerificationResult> {
        let chunks = plan_chunks(candidates, self.chunk_size);
        let total = chunks.len();
        let mut results = Vec::new();

        for (index, chunk) in chunks.into_iter().enumerate() {
            if session.is_cancelled() {
                info!("Scan cancelled after {}/{} chunks", index, total);
                break;
            }

            let size = chunk.len();
            let verified = self.run_chunk(chunk).await;
            let found = verified.len();
            results.extend(
                verified
                    .into_iter()
                    .filter(|r| !session.blacklist.contains(&r.address)),
            );

            let progress = ChunkProgress {
                completed: index + 1,
                total,
            };
            info!(
                "Chunk {} done: {} of {} candidates verified",
                progress, found, size
            );
            if let Some(callback) = &self.progress {
                callback(progress);
            }
        }

        results
    }

    async fn run_chunk(&self, chunk: Vec<String>) -> Vec<VerificationResult> {
        let gate = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();

        for address in chunk {
            let gate = Arc::clone(&gate);
            let verifier = Arc::clone(&self.verifier);
            set.spawn(async move {
                let Ok(_permit) = gate.acquire_owned().await else {
                    return None;
                };
                debug!("Verifying {}", address);
                verifier.verify(&address).await
            });
        }

        let mut verified = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(result)) => verified.push(result),
                Ok(None) => {}
                Err(e) => warn!("Verification task failed: {}", e),
            }
        }
        verified
    }
}
