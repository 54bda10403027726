//! Candidate verification: liveness, anonymity and protocol detection

use crate::proxy::endpoints::{
    default_verification_endpoints, ProtocolProbe, VerificationEndpoint, DEFAULT_HEADER_ECHO_URL,
    FORWARDING_HEADERS, PROTOCOL_PROBES,
};
use crate::proxy::enrichment::EnrichmentCache;
use crate::proxy::models::{AnonymityLevel, ProtocolSet, VerificationResult};
use crate::proxy::parser::{CandidateAddr, CandidateParser};
use crate::proxy::socks4;
use crate::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use futures::future::join_all;
use rand::seq::IndexedRandom;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default timeout for the liveness probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for anonymity and protocol probes in seconds
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Status line and body of one proxied request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Why a proxied request failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("client setup failed: {0}")]
    Client(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    /// Headers arrived but the body stream broke
    #[error("reading response body failed: {0}")]
    Body(String),
}

/// Issues a GET to `target` routed through `proxy_uri`
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    async fn get(
        &self,
        proxy_uri: &str,
        target: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError>;
}

/// `ProxyTransport` over reqwest, one client per request since the proxy differs.
/// `socks4://` proxies, which reqwest cannot dial, go through `socks4::get`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    fn create_client(&self, proxy_uri: &str, timeout: Duration) -> Result<Client, ProbeError> {
        let proxy = ReqwestProxy::all(proxy_uri).map_err(|e| ProbeError::Client(e.to_string()))?;
        Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if err.is_connect() {
        ProbeError::Connect(err.to_string())
    } else if err.is_builder() {
        ProbeError::Client(err.to_string())
    } else {
        ProbeError::Request(err.to_string())
    }
}

#[async_trait]
impl ProxyTransport for ReqwestTransport {
    async fn get(
        &self,
        proxy_uri: &str,
        target: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, ProbeError> {
        if let Some(proxy_addr) = proxy_uri.strip_prefix("socks4://") {
            return match tokio::time::timeout(
                timeout,
                socks4::get(proxy_addr, target, &self.user_agent),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(timeout)),
            };
        }

        let client = self.create_client(proxy_uri, timeout)?;

        let request = async {
            let response = client
                .get(target)
                .send()
                .await
                .map_err(|e| classify_reqwest_error(e, timeout))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| ProbeError::Body(e.to_string()))?;
            Ok(ProbeResponse { status, body })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        }
    }
}

/// Errors that escape a verification attempt and make it worth retrying
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("transport error after liveness: {0}")]
    Transport(ProbeError),
    /// Liveness answered 200 with a body the endpoint's schema cannot read
    #[error("unrecognized response from {0}")]
    UnrecognizedBody(String),
}

/// Configuration for the verifier
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Timeout for the liveness probe
    pub timeout: Duration,
    /// Timeout for each anonymity and protocol probe
    pub probe_timeout: Duration,
    /// Endpoints the liveness probe picks from at random
    pub endpoints: Vec<VerificationEndpoint>,
    /// Endpoint echoing request headers back
    pub header_echo_url: String,
    pub protocol_probes: Vec<ProtocolProbe>,
    /// Retry policy for a whole verification
    pub retry: RetryPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            endpoints: default_verification_endpoints(),
            header_echo_url: DEFAULT_HEADER_ECHO_URL.to_string(),
            protocol_probes: PROTOCOL_PROBES.to_vec(),
            retry: RetryPolicy::verification(),
        }
    }
}

impl VerifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<VerificationEndpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_header_echo_url(mut self, url: String) -> Self {
        self.header_echo_url = url;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Anything that can turn a candidate address into a verification result
#[async_trait]
pub trait CandidateVerifier: Send + Sync {
    async fn verify(&self, address: &str) -> Option<VerificationResult>;
}

/// Verifies candidates through a `ProxyTransport`
pub struct Verifier {
    config: VerifierConfig,
    transport: Arc<dyn ProxyTransport>,
    cache: Arc<EnrichmentCache>,
}

impl Verifier {
    pub fn new(
        config: VerifierConfig,
        transport: Arc<dyn ProxyTransport>,
        cache: Arc<EnrichmentCache>,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// One verification attempt.
    ///
    /// `Ok(None)` is a clean liveness failure; `Err` is a fault after the
    /// proxy already answered 200 (broken body, unreadable body), which the
    /// caller may retry.
    pub async fn verify_once(
        &self,
        address: &str,
        addr: &CandidateAddr,
    ) -> Result<Option<VerificationResult>, VerifyError> {
        let endpoint = {
            let mut rng = rand::rng();
            self.config.endpoints.choose(&mut rng).cloned()
        };
        let Some(endpoint) = endpoint else {
            error!("No verification endpoints configured");
            return Ok(None);
        };

        let start = Instant::now();
        let response = match self
            .transport
            .get(&addr.proxy_uri("http"), &endpoint.url, self.config.timeout)
            .await
        {
            Ok(response) => response,
            Err(ProbeError::Body(e)) => return Err(VerifyError::Transport(ProbeError::Body(e))),
            Err(e) => {
                debug!("{} failed liveness via {}: {}", address, endpoint.url, e);
                return Ok(None);
            }
        };
        let latency = start.elapsed().as_secs_f64();

        if !response.is_ok() {
            debug!(
                "{} failed liveness via {}: HTTP {}",
                address, endpoint.url, response.status
            );
            return Ok(None);
        }

        let Some(observed_ip) = endpoint.schema.extract_ip(&response.body) else {
            debug!(
                "{} returned a body {} does not recognize",
                address, endpoint.url
            );
            return Err(VerifyError::UnrecognizedBody(endpoint.url));
        };

        let anonymity_level = self.check_anonymity(addr).await;
        let protocols = self.detect_protocols(addr).await;
        let geo = self.cache.lookup(&observed_ip);

        debug!(
            "{} alive in {:.3}s, egress {}, {}",
            address, latency, observed_ip, anonymity_level
        );

        Ok(Some(VerificationResult {
            address: address.to_string(),
            latency,
            observed_ip,
            anonymity_level,
            protocols,
            geo,
        }))
    }

    /// Classify anonymity from the header echo; any failure is Transparent
    pub async fn check_anonymity(&self, addr: &CandidateAddr) -> AnonymityLevel {
        match self
            .transport
            .get(
                &addr.proxy_uri("http"),
                &self.config.header_echo_url,
                self.config.probe_timeout,
            )
            .await
        {
            Ok(response) if response.is_ok() => classify_anonymity(&response.body, addr.bare_host()),
            Ok(response) => {
                debug!("Header echo through {} returned HTTP {}", addr, response.status);
                AnonymityLevel::Transparent
            }
            Err(e) => {
                debug!("Header echo through {} failed: {}", addr, e);
                AnonymityLevel::Transparent
            }
        }
    }

    /// Probe every configured protocol independently; only HTTP 200 counts
    pub async fn detect_protocols(&self, addr: &CandidateAddr) -> ProtocolSet {
        let probes = self.config.protocol_probes.iter().copied().map(|probe| async move {
            let result = self
                .transport
                .get(
                    &addr.proxy_uri(probe.proxy_scheme),
                    probe.target_url,
                    self.config.probe_timeout,
                )
                .await;
            match result {
                Ok(response) if response.is_ok() => Some(probe.protocol),
                _ => None,
            }
        });

        join_all(probes).await.into_iter().flatten().collect()
    }
}

#[async_trait]
impl CandidateVerifier for Verifier {
    async fn verify(&self, address: &str) -> Option<VerificationResult> {
        let Some(addr) = CandidateParser::parse(address) else {
            debug!("Skipping unparseable candidate {:?}", address);
            return None;
        };

        let result = retry_with_backoff(
            &self.config.retry,
            address,
            || self.verify_once(address, &addr),
            |_: &VerifyError| true,
        )
        .await;

        match result {
            Ok(result) => result,
            Err(e) => {
                error!("Verification of {} failed after retries: {}", address, e);
                None
            }
        }
    }
}

/// Decide anonymity from a `{"headers": {...}}` echo body.
///
/// - no forwarding header: Elite
/// - forwarding header not mentioning `host`: Anonymous
/// - forwarding header mentioning `host`: Transparent
///
/// A body that is not a header echo counts as a failed probe (Transparent).
pub fn classify_anonymity(body: &str, host: &str) -> AnonymityLevel {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return AnonymityLevel::Transparent;
    };
    let Some(headers) = value.get("headers").and_then(|h| h.as_object()) else {
        return AnonymityLevel::Transparent;
    };

    let forwarded: Vec<&str> = headers
        .iter()
        .filter(|(name, _)| {
            let name = name.to_lowercase();
            FORWARDING_HEADERS.contains(&name.as_str())
        })
        .filter_map(|(_, value)| value.as_str())
        .collect();

    if forwarded.is_empty() {
        AnonymityLevel::Elite
    } else if forwarded
        .iter()
        .flat_map(|value| forwarded_addresses(value))
        .any(|addr| addr == host)
    {
        AnonymityLevel::Transparent
    } else {
        AnonymityLevel::Anonymous
    }
}

/// Addresses listed in a forwarding header value, e.g. `a, b` or the
/// `for=` parameters of `Forwarded`, without quotes, brackets or ports
fn forwarded_addresses(value: &str) -> impl Iterator<Item = &str> {
    value.split(&[',', ';'][..]).filter_map(|token| {
        let token = token.trim();
        let token = match token.split_once('=') {
            Some((key, rest)) if key.trim().eq_ignore_ascii_case("for") => rest.trim(),
            Some(_) => return None,
            None => token,
        };
        let token = token.trim_matches('"');
        let addr = match token.strip_prefix('[') {
            Some(rest) => rest.split(']').next().unwrap_or(rest),
            None if token.matches(':').count() == 1 => token.split(':').next().unwrap_or(token),
            None => token,
        };
        Some(addr)
    })
}
