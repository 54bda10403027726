//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Placeholder used for any enrichment field the lookup could not resolve
pub const UNKNOWN: &str = "Unknown";

/// Proxy protocol a candidate can be probed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Socks4,
        Protocol::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks4 => "socks4",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "socks4" => Ok(Protocol::Socks4),
            "socks5" => Ok(Protocol::Socks5),
            other => Err(format!(
                "Invalid protocol: {}. Use: http, https, socks4, socks5",
                other
            )),
        }
    }
}

/// Set of protocols a proxy answered on, kept ordered so it serializes stably
pub type ProtocolSet = BTreeSet<Protocol>;

/// Serialize a protocol set into the stored form, e.g. `"http,socks5"`
pub fn join_protocols(protocols: &ProtocolSet) -> String {
    protocols
        .iter()
        .map(Protocol::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the stored comma-delimited form back into a set
pub fn split_protocols(raw: &str) -> Result<ProtocolSet, String> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Protocol::from_str)
        .collect()
}

/// How much a proxy reveals about the client behind it.
///
/// Ordered: `Transparent < Anonymous < Elite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AnonymityLevel {
    Transparent = 1,
    Anonymous = 2,
    Elite = 3,
}

impl AnonymityLevel {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for AnonymityLevel {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AnonymityLevel::Transparent),
            2 => Ok(AnonymityLevel::Anonymous),
            3 => Ok(AnonymityLevel::Elite),
            other => Err(format!("anonymity level out of range: {}", other)),
        }
    }
}

impl FromStr for AnonymityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "transparent" => Ok(AnonymityLevel::Transparent),
            "2" | "anonymous" => Ok(AnonymityLevel::Anonymous),
            "3" | "elite" => Ok(AnonymityLevel::Elite),
            other => Err(format!(
                "Invalid anonymity level: {}. Use: transparent, anonymous, elite",
                other
            )),
        }
    }
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "transparent"),
            AnonymityLevel::Anonymous => write!(f, "anonymous"),
            AnonymityLevel::Elite => write!(f, "elite"),
        }
    }
}

/// Geolocation and ISP data attached to an observed egress IP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub city: String,
    pub isp: String,
}

impl GeoInfo {
    pub fn new(country: impl Into<String>, city: impl Into<String>, isp: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
            isp: isp.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        self.country == UNKNOWN && self.city == UNKNOWN && self.isp == UNKNOWN
    }
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Outcome of one successful verification pass over a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub address: String,
    /// Seconds
    pub latency: f64,
    pub observed_ip: String,
    pub anonymity_level: AnonymityLevel,
    pub protocols: ProtocolSet,
    pub geo: GeoInfo,
}

/// Persisted statistics for one proxy address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: String,
    pub latency: f64,
    pub country: String,
    pub city: String,
    pub isp: String,
    pub anonymity_level: AnonymityLevel,
    pub protocols: ProtocolSet,
    pub last_checked: DateTime<Utc>,
    pub successful_checks: i64,
    pub total_checks: i64,
}

impl ProxyRecord {
    pub fn success_ratio(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.successful_checks as f64 / self.total_checks as f64
        }
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.3}s {}/{} [{}] {} {}/{} {}",
            self.address,
            self.latency,
            self.country,
            self.city,
            join_protocols(&self.protocols),
            self.anonymity_level,
            self.successful_checks,
            self.total_checks,
            self.isp,
        )
    }
}
