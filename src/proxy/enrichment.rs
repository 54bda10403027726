//! Session-scoped memoization of geolocation lookups

use crate::proxy::geo::{GeoError, GeoLookup};
use crate::proxy::models::GeoInfo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Caches `GeoLookup` results by IP for the lifetime of a scan session.
///
/// Entries are never evicted. The map lock is held across the underlying
/// lookup so each IP reaches the database at most once, even when several
/// verification tasks observe the same egress IP concurrently.
pub struct EnrichmentCache {
    geo: Arc<dyn GeoLookup>,
    entries: Mutex<HashMap<String, GeoInfo>>,
}

impl EnrichmentCache {
    pub fn new(geo: Arc<dyn GeoLookup>) -> Self {
        Self {
            geo,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an IP, consulting the backing lookup only on first sight
    pub fn lookup(&self, ip: &str) -> GeoInfo {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(hit) = entries.get(ip) {
            return hit.clone();
        }

        let geo = match self.geo.lookup(ip) {
            Ok(geo) => geo,
            Err(GeoError::Unavailable) => GeoInfo::unknown(),
            Err(e) => {
                debug!("Enrichment for {} failed: {}", ip, e);
                GeoInfo::unknown()
            }
        };
        entries.insert(ip.to_string(), geo.clone());
        geo
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
