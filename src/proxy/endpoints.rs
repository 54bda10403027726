//! Probe targets: "what is my IP" endpoints, the header echo, and the
//! per-protocol probe table.

use crate::proxy::models::Protocol;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Echoes request headers back as `{"headers": {...}}`
pub const DEFAULT_HEADER_ECHO_URL: &str = "http://httpbin.org/headers";

/// Headers that reveal a proxy forwarded the request, compared case-insensitively
pub const FORWARDING_HEADERS: [&str; 3] = ["x-forwarded-for", "forwarded", "x-real-ip"];

/// Shape of the body returned by a verification endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSchema {
    /// ip-api.com: `{"query": "1.2.3.4", ...}`
    IpApi,
    /// api.ipify.org: `{"ip": "1.2.3.4"}`
    Ipify,
    /// ifconfig.me: `{"ip_addr": "1.2.3.4", ...}`
    IfconfigMe,
    /// ipinfo.io: `{"ip": "1.2.3.4", ...}`
    Ipinfo,
    /// Body is the bare address
    PlainText,
}

impl ResponseSchema {
    fn ip_field(&self) -> Option<&'static str> {
        match self {
            ResponseSchema::IpApi => Some("query"),
            ResponseSchema::Ipify | ResponseSchema::Ipinfo => Some("ip"),
            ResponseSchema::IfconfigMe => Some("ip_addr"),
            ResponseSchema::PlainText => None,
        }
    }

    /// Pull the observed IP out of a response body. `None` if the body does
    /// not match this schema or the value is not an IP address.
    pub fn extract_ip(&self, body: &str) -> Option<String> {
        let raw = match self.ip_field() {
            Some(field) => {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                value.get(field)?.as_str()?.trim().to_string()
            }
            None => body.trim().to_string(),
        };
        raw.parse::<IpAddr>().ok()?;
        Some(raw)
    }
}

/// A "what is my IP" endpoint and how to read its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEndpoint {
    pub url: String,
    pub schema: ResponseSchema,
}

impl VerificationEndpoint {
    pub fn new(url: &str, schema: ResponseSchema) -> Self {
        Self {
            url: url.to_string(),
            schema,
        }
    }
}

pub fn default_verification_endpoints() -> Vec<VerificationEndpoint> {
    vec![
        VerificationEndpoint::new("http://ip-api.com/json/", ResponseSchema::IpApi),
        VerificationEndpoint::new("https://api.ipify.org?format=json", ResponseSchema::Ipify),
        VerificationEndpoint::new("https://ifconfig.me/all.json", ResponseSchema::IfconfigMe),
        VerificationEndpoint::new("https://ipinfo.io/json", ResponseSchema::Ipinfo),
    ]
}

/// How one protocol is probed: which page to fetch, through which proxy scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolProbe {
    pub protocol: Protocol,
    pub target_url: &'static str,
    pub proxy_scheme: &'static str,
}

pub const PROTOCOL_PROBES: [ProtocolProbe; 4] = [
    ProtocolProbe {
        protocol: Protocol::Http,
        target_url: "http://example.com",
        proxy_scheme: "http",
    },
    ProtocolProbe {
        protocol: Protocol::Https,
        target_url: "https://example.com",
        proxy_scheme: "http",
    },
    ProtocolProbe {
        protocol: Protocol::Socks4,
        target_url: "http://example.com",
        proxy_scheme: "socks4",
    },
    ProtocolProbe {
        protocol: Protocol::Socks5,
        target_url: "http://example.com",
        proxy_scheme: "socks5",
    },
];
