//! Per-session shared state: blacklist, enrichment cache and cancellation.

use crate::proxy::enrichment::EnrichmentCache;
use crate::proxy::geo::GeoLookup;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// In-memory set of addresses excluded from results for this session only
#[derive(Debug, Default)]
pub struct SessionBlacklist {
    addresses: RwLock<HashSet<String>>,
}

impl SessionBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the address was not blacklisted before
    pub fn add(&self, address: impl Into<String>) -> bool {
        match self.addresses.write() {
            Ok(mut set) => set.insert(address.into()),
            Err(poisoned) => poisoned.into_inner().insert(address.into()),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        match self.addresses.read() {
            Ok(set) => set.contains(address),
            Err(poisoned) => poisoned.into_inner().contains(address),
        }
    }

    pub fn len(&self) -> usize {
        match self.addresses.read() {
            Ok(set) => set.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a scan shares between its concurrent verification tasks.
///
/// Built once per session and dropped with it; nothing here is global.
#[derive(Clone)]
pub struct ScanSession {
    pub cache: Arc<EnrichmentCache>,
    pub blacklist: Arc<SessionBlacklist>,
    pub cancel: CancellationToken,
}

impl ScanSession {
    pub fn new(geo: Arc<dyn GeoLookup>) -> Self {
        Self {
            cache: Arc::new(EnrichmentCache::new(geo)),
            blacklist: Arc::new(SessionBlacklist::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an outer token, e.g. a child of a periodic runner's stop handle
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn blacklist(&self, address: impl Into<String>) -> bool {
        self.blacklist.add(address)
    }

    /// Ask a running scan to stop before its next chunk
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::geo::UnavailableGeoLookup;

    #[test]
    fn test_blacklist_add_and_contains() {
        let blacklist = SessionBlacklist::new();
        assert!(blacklist.is_empty());
        assert!(blacklist.add("1.2.3.4:8080"));
        assert!(!blacklist.add("1.2.3.4:8080"));
        assert!(blacklist.contains("1.2.3.4:8080"));
        assert!(!blacklist.contains("1.2.3.4:8081"));
        assert_eq!(blacklist.len(), 1);
    }

    #[test]
    fn test_blacklist_is_exact_match() {
        let blacklist = SessionBlacklist::new();
        blacklist.add("1.2.3.4:8080");
        assert!(!blacklist.contains(" 1.2.3.4:8080"));
    }

    #[test]
    fn test_session_clones_share_state() {
        let session = ScanSession::new(Arc::new(UnavailableGeoLookup));
        let other = session.clone();
        other.blacklist("5.6.7.8:3128");
        assert!(session.blacklist.contains("5.6.7.8:3128"));

        assert!(!session.is_cancelled());
        other.cancel();
        assert!(session.is_cancelled());
    }

    #[test]
    fn test_session_follows_parent_token() {
        let parent = CancellationToken::new();
        let session =
            ScanSession::new(Arc::new(UnavailableGeoLookup)).with_cancel(parent.child_token());
        assert!(!session.is_cancelled());
        parent.cancel();
        assert!(session.is_cancelled());

        // cancelling the session leaves the parent alone
        let parent = CancellationToken::new();
        let session =
            ScanSession::new(Arc::new(UnavailableGeoLookup)).with_cancel(parent.child_token());
        session.cancel();
        assert!(!parent.is_cancelled());
    }
}
