//! Candidate address parsing

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// `scheme://host:port`, scheme optional, trailing slash tolerated
static URL_FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:https?|socks[45])://)?(\[[0-9A-Fa-f:.]+\]|[^:/\s\[\]]+):(\d{1,5})/?$")
        .expect("Invalid candidate regex")
});

/// Host and port split out of a raw candidate string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateAddr {
    pub host: String,
    pub port: u16,
}

impl CandidateAddr {
    /// Build a proxy URI for this address using the given scheme
    pub fn proxy_uri(&self, scheme: &str) -> String {
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Host without IPv6 brackets, as it would appear in a forwarding header
    pub fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for CandidateAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parser turning raw candidate lines into dialable addresses
pub struct CandidateParser;

impl CandidateParser {
    /// Parse a single candidate line
    ///
    /// Supports formats:
    /// - HOST:PORT
    /// - [IPV6]:PORT
    /// - scheme://HOST:PORT
    ///
    /// Port 0 and anything else (HTML fragments, comments) is rejected.
    pub fn parse(line: &str) -> Option<CandidateAddr> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let caps = URL_FORMAT_REGEX.captures(line)?;
        let host = caps.get(1)?.as_str().to_string();
        let port: u16 = caps.get(2)?.as_str().parse().ok()?;
        if port == 0 {
            return None;
        }

        Some(CandidateAddr { host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_format() {
        let addr = CandidateParser::parse("192.168.1.1:8080").unwrap();
        assert_eq!(addr.host, "192.168.1.1");
        assert_eq!(addr.port, 8080);
    }

    #[test]
    fn test_parse_url_format() {
        let addr = CandidateParser::parse("socks5://10.0.0.1:1080").unwrap();
        assert_eq!(addr.host, "10.0.0.1");
        assert_eq!(addr.port, 1080);

        let addr = CandidateParser::parse("http://proxy.example.com:3128/").unwrap();
        assert_eq!(addr.host, "proxy.example.com");
        assert_eq!(addr.port, 3128);
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = CandidateParser::parse("[2001:db8::1]:8080").unwrap();
        assert_eq!(addr.host, "[2001:db8::1]");
        assert_eq!(addr.bare_host(), "2001:db8::1");
        assert_eq!(addr.proxy_uri("http"), "http://[2001:db8::1]:8080");
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert!(CandidateParser::parse("").is_none());
        assert!(CandidateParser::parse("# comment").is_none());
        assert!(CandidateParser::parse("<td>192.168.1.1</td>").is_none());
        assert!(CandidateParser::parse("192.168.1.1").is_none());
        assert!(CandidateParser::parse("192.168.1.1:abc").is_none());
        assert!(CandidateParser::parse("192.168.1.1:0").is_none());
        assert!(CandidateParser::parse("192.168.1.1:70000").is_none());
        assert!(CandidateParser::parse("ftp://192.168.1.1:21").is_none());
    }

    #[test]
    fn test_proxy_uri() {
        let addr = CandidateParser::parse("  1.2.3.4:8080 ").unwrap();
        assert_eq!(addr.proxy_uri("socks4"), "socks4://1.2.3.4:8080");
        assert_eq!(addr.to_string(), "1.2.3.4:8080");
    }
}
