//! Runtime configuration: TOML file, then environment overrides

use crate::proxy::checker::VerifierConfig;
use crate::proxy::crawler::CrawlerConfig;
use crate::proxy::endpoints::{
    default_verification_endpoints, VerificationEndpoint, DEFAULT_HEADER_ECHO_URL,
};
use crate::scheduler::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT_CHECKS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Candidates verified per chunk
    pub chunk_size: usize,
    /// Verifications in flight within one chunk
    pub max_concurrent_checks: usize,
    /// SQLite database file
    pub db_path: PathBuf,
    /// License key for whoever provisions the GeoLite2 databases
    pub geo_database_credential: Option<String>,
    /// Liveness probe timeout in seconds
    pub proxy_check_timeout: u64,
    /// Successful checks a record needs before queries return it
    pub min_successful_checks: i64,
    /// Pages whose lines are candidate addresses
    pub proxy_source_urls: Vec<String>,
    pub verification_endpoints: Vec<VerificationEndpoint>,
    pub geo_city_database: PathBuf,
    pub geo_asn_database: Option<PathBuf>,
    pub header_echo_url: String,
    /// Period of `watch` mode
    pub scan_interval_secs: u64,
    /// Per-source fetch timeout in seconds
    pub source_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            db_path: PathBuf::from("proxy_database.db"),
            geo_database_credential: None,
            proxy_check_timeout: 10,
            min_successful_checks: 2,
            proxy_source_urls: vec![
                "https://www.socks-proxy.net/".to_string(),
                "https://www.proxynova.com/proxy-server-list/country-br/".to_string(),
            ],
            verification_endpoints: default_verification_endpoints(),
            geo_city_database: PathBuf::from("GeoLite2-City.mmdb"),
            geo_asn_database: Some(PathBuf::from("GeoLite2-ASN.mmdb")),
            header_echo_url: DEFAULT_HEADER_ECHO_URL.to_string(),
            scan_interval_secs: 3600,
            source_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// File (if any), then process environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHUNK_SIZE") {
            self.chunk_size = parse_var("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_CHECKS") {
            self.max_concurrent_checks = parse_var("MAX_CONCURRENT_CHECKS", &v)?;
        }
        if let Some(v) = lookup("DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAXMIND_LICENSE_KEY") {
            self.geo_database_credential = Some(v);
        }
        if let Some(v) = lookup("PROXY_TIMEOUT") {
            self.proxy_check_timeout = parse_var("PROXY_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MIN_SUCCESSFUL_CHECKS") {
            self.min_successful_checks = parse_var("MIN_SUCCESSFUL_CHECKS", &v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk_size must be at least 1".into()));
        }
        if self.max_concurrent_checks == 0 {
            return Err(Error::Configuration(
                "max_concurrent_checks must be at least 1".into(),
            ));
        }
        if self.proxy_check_timeout == 0 {
            return Err(Error::Configuration(
                "proxy_check_timeout must be at least 1 second".into(),
            ));
        }
        if self.verification_endpoints.is_empty() {
            return Err(Error::Configuration(
                "at least one verification endpoint is required".into(),
            ));
        }
        if self.scan_interval_secs == 0 {
            return Err(Error::Configuration(
                "scan_interval_secs must be at least 1".into(),
            ));
        }
        if self.source_timeout_secs == 0 {
            return Err(Error::Configuration(
                "source_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_proxy_check_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_check_timeout = timeout.as_secs();
        self
    }

    pub fn with_min_successful_checks(mut self, min: i64) -> Self {
        self.min_successful_checks = min;
        self
    }

    pub fn with_proxy_source_urls(mut self, urls: Vec<String>) -> Self {
        self.proxy_source_urls = urls;
        self
    }

    pub fn with_verification_endpoints(mut self, endpoints: Vec<VerificationEndpoint>) -> Self {
        self.verification_endpoints = endpoints;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval_secs = interval.as_secs();
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout_secs = timeout.as_secs();
        self
    }

    pub fn proxy_check_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_check_timeout)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig::new()
            .with_timeout(self.proxy_check_timeout())
            .with_endpoints(self.verification_endpoints.clone())
            .with_header_echo_url(self.header_echo_url.clone())
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new().with_timeout(Duration::from_secs(self.source_timeout_secs))
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Configuration(format!("{}={:?}: {}", name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::endpoints::ResponseSchema;
    use crate::retry::RetryPolicy;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.max_concurrent_checks, 1000);
        assert_eq!(config.db_path, PathBuf::from("proxy_database.db"));
        assert_eq!(config.proxy_check_timeout(), Duration::from_secs(10));
        assert_eq!(config.min_successful_checks, 2);
        assert_eq!(config.verification_endpoints.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .apply_env_from(env(&[
                ("CHUNK_SIZE", "50"),
                ("MAX_CONCURRENT_CHECKS", " 20 "),
                ("DB_PATH", "/tmp/other.db"),
                ("MAXMIND_LICENSE_KEY", "secret"),
                ("PROXY_TIMEOUT", "3"),
                ("MIN_SUCCESSFUL_CHECKS", "5"),
            ]))
            .unwrap();

        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.max_concurrent_checks, 20);
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.geo_database_credential.as_deref(), Some("secret"));
        assert_eq!(config.proxy_check_timeout(), Duration::from_secs(3));
        assert_eq!(config.min_successful_checks, 5);
    }

    #[test]
    fn test_unset_env_keeps_values() {
        let config = Config::default()
            .with_chunk_size(7)
            .apply_env_from(env(&[]))
            .unwrap();
        assert_eq!(config.chunk_size, 7);
    }

    #[test]
    fn test_unparseable_env_is_configuration_error() {
        let err = Config::default()
            .apply_env_from(env(&[("CHUNK_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("CHUNK_SIZE")));
    }

    #[test]
    fn test_zero_sizes_fail_validation() {
        assert!(matches!(
            Config::default().with_chunk_size(0).validate(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Config::default().with_max_concurrent_checks(0).validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy-vet.toml");
        fs::write(
            &path,
            r#"
chunk_size = 250
proxy_source_urls = ["https://example.org/list.txt"]

[[verification_endpoints]]
url = "https://example.org/ip"
schema = "plain_text"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.max_concurrent_checks, 1000);
        assert_eq!(config.proxy_source_urls, vec!["https://example.org/list.txt"]);
        assert_eq!(
            config.verification_endpoints,
            vec![VerificationEndpoint::new("https://example.org/ip", ResponseSchema::PlainText)]
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxy-vet.toml");
        let config = Config::default().with_chunk_size(42).with_db_path("stats.db");
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_verifier_config_follows_settings() {
        let config = Config::default().with_proxy_check_timeout(Duration::from_secs(4));
        let verifier = config.verifier_config();
        assert_eq!(verifier.timeout, Duration::from_secs(4));
        assert_eq!(verifier.endpoints, config.verification_endpoints);
        assert_eq!(verifier.header_echo_url, DEFAULT_HEADER_ECHO_URL);
    }

    #[test]
    fn test_crawler_config_follows_settings() {
        assert_eq!(Config::default().crawler_config().timeout, Duration::from_secs(30));

        let config = Config::default().with_source_timeout(Duration::from_secs(5));
        let crawler = config.crawler_config();
        assert_eq!(crawler.timeout, Duration::from_secs(5));
        assert_eq!(crawler.retry, RetryPolicy::aggregation());

        assert!(matches!(
            Config::default().with_source_timeout(Duration::ZERO).validate(),
            Err(Error::Configuration(_))
        ));
    }
}
