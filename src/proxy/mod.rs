//! Proxy module for aggregating and verifying candidates
//!
//! This module provides functionality for:
//! - Parsing candidate strings into host and port
//! - Fetching candidate lists from sources with retry
//! - Verifying liveness, anonymity and supported protocols through a transport seam
//! - Enriching observed egress IPs with cached geolocation

pub mod checker;
pub mod crawler;
pub mod endpoints;
pub mod enrichment;
pub mod geo;
pub mod models;
pub mod parser;
pub mod socks4;

pub use checker::{
    classify_anonymity, CandidateVerifier, ProbeError, ProbeResponse, ProxyTransport,
    ReqwestTransport, Verifier, VerifierConfig,
};
pub use crawler::{CrawlerConfig, HttpSourceFetcher, SourceAggregator, SourceFetchError, SourceFetcher};
pub use endpoints::{ResponseSchema, VerificationEndpoint, PROTOCOL_PROBES};
pub use enrichment::EnrichmentCache;
pub use geo::{GeoError, GeoLookup, MaxMindGeoLookup, UnavailableGeoLookup};
pub use models::{AnonymityLevel, GeoInfo, Protocol, ProtocolSet, ProxyRecord, VerificationResult};
pub use parser::{CandidateAddr, CandidateParser};
