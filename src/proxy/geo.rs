//! Geolocation lookups for observed proxy egress IPs using MMDB

use crate::proxy::models::{GeoInfo, UNKNOWN};
use crate::{Error, Result};
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Database files below this size are treated as truncated downloads
pub const MIN_DATABASE_BYTES: u64 = 1_000_000;

/// Why a lookup produced no enrichment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeoError {
    #[error("geolocation database unavailable")]
    Unavailable,
    #[error("invalid IP address: {0}")]
    InvalidIp(String),
    #[error("lookup failed: {0}")]
    Lookup(String),
}

/// Maps an IP to country, city and ISP
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: &str) -> std::result::Result<GeoInfo, GeoError>;

    /// Whether the backing data loaded successfully
    fn is_available(&self) -> bool;
}

/// Lookup used when no database could be loaded; every IP resolves to Unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGeoLookup;

impl GeoLookup for UnavailableGeoLookup {
    fn lookup(&self, _ip: &str) -> std::result::Result<GeoInfo, GeoError> {
        Err(GeoError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// GeoLookup backed by GeoLite2 City and (optionally) ASN databases
#[derive(Clone)]
pub struct MaxMindGeoLookup {
    city: Arc<Reader<Vec<u8>>>,
    asn: Option<Arc<Reader<Vec<u8>>>>,
}

impl MaxMindGeoLookup {
    /// Open the City database and, if given, the ASN database used for ISP names
    pub fn open<P: AsRef<Path>>(city_path: P, asn_path: Option<P>) -> Result<Self> {
        let city = Arc::new(open_reader(city_path.as_ref())?);
        let asn = match asn_path {
            Some(path) => match open_reader(path.as_ref()) {
                Ok(reader) => Some(Arc::new(reader)),
                Err(e) => {
                    warn!("ASN database not loaded, ISP will be Unknown: {}", e);
                    None
                }
            },
            None => None,
        };
        Ok(Self { city, asn })
    }

    /// Open the databases, falling back to an always-Unknown lookup on failure
    pub fn open_or_unavailable(city_path: &Path, asn_path: Option<&Path>) -> Arc<dyn GeoLookup> {
        match Self::open(city_path, asn_path) {
            Ok(lookup) => Arc::new(lookup),
            Err(e) => {
                warn!("Geolocation disabled, enrichment will be Unknown: {}", e);
                Arc::new(UnavailableGeoLookup)
            }
        }
    }

    fn lookup_ip(&self, ip: IpAddr) -> std::result::Result<GeoInfo, GeoError> {
        let mut geo = GeoInfo::unknown();

        let city_lookup = self
            .city
            .lookup(ip)
            .map_err(|e| GeoError::Lookup(e.to_string()))?;
        let city: Option<geoip2::City> = city_lookup
            .decode()
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        if let Some(city) = city {
            if let Some(code) = city.country.iso_code {
                geo.country = code.to_string();
            }
            if let Some(name) = city.city.names.english {
                geo.city = name.to_string();
            }
        }

        if let Some(asn_reader) = &self.asn {
            if let Ok(asn_lookup) = asn_reader.lookup(ip) {
                if let Ok(Some(asn)) = asn_lookup.decode::<geoip2::Asn>() {
                    geo.isp = asn
                        .autonomous_system_organization
                        .map(String::from)
                        .unwrap_or_else(|| UNKNOWN.to_string());
                }
            }
        }

        Ok(geo)
    }
}

impl GeoLookup for MaxMindGeoLookup {
    fn lookup(&self, ip: &str) -> std::result::Result<GeoInfo, GeoError> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;
        self.lookup_ip(ip)
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn open_reader(path: &Path) -> Result<Reader<Vec<u8>>> {
    let size = std::fs::metadata(path)
        .map_err(|e| Error::Geo(format!("{}: {}", path.display(), e)))?
        .len();
    if size <= MIN_DATABASE_BYTES {
        return Err(Error::Geo(format!(
            "{} is too small ({} bytes) or truncated",
            path.display(),
            size
        )));
    }
    let reader = Reader::open_readfile(path)?;
    info!("Loaded geolocation database {}", path.display());
    Ok(reader)
}
