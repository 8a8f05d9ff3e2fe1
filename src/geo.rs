//! Geographic enrichment of probe results.
//!
//! Lookups are best effort: every failure path degrades to "no value" for
//! that field alone, so a missing country never costs the city or the record.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::geoip2;

/// Resolves geographic attributes for a raw target address.
///
/// The two lookups are independently fallible; callers substitute an empty
/// string wherever a lookup returns `None`.
pub trait GeoLookup: Send + Sync {
    /// ISO country code for the address, if known.
    fn country(&self, address: &str) -> Option<String>;
    /// English city name for the address, if known.
    fn city(&self, address: &str) -> Option<String>;
}

/// Provider used when no geo database is configured; every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeo;

impl GeoLookup for DisabledGeo {
    fn country(&self, _address: &str) -> Option<String> {
        None
    }

    fn city(&self, _address: &str) -> Option<String> {
        None
    }
}

/// MaxMind GeoLite2 database reader.
pub struct MaxMindGeo {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeo {
    /// Opens a `.mmdb` database file. Unreadable databases are startup
    /// failures; lookups against an open database never fail the run.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)?;
        Ok(Self { reader })
    }
}

impl GeoLookup for MaxMindGeo {
    fn country(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.parse().ok()?;
        let record: geoip2::Country = self.reader.lookup(ip).ok()?;
        record
            .country
            .and_then(|c| c.iso_code)
            .map(ToOwned::to_owned)
    }

    fn city(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.parse().ok()?;
        let record: geoip2::City = self.reader.lookup(ip).ok()?;
        record
            .city
            .and_then(|c| c.names)
            .and_then(|names| names.get("en").map(|name| (*name).to_owned()))
    }
}
