//! Conflict-Checked DNS Records
//!
//! Record creation refuses to clobber names that already resolve to
//! something else, and is a no-op when the exact record already exists.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolver::ip_to_ptr;

/// Record types handled by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    #[allow(clippy::upper_case_acronyms)]
    AAAA,
    #[allow(clippy::upper_case_acronyms)]
    CNAME,
    #[allow(clippy::upper_case_acronyms)]
    PTR,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::PTR => write!(f, "PTR"),
        }
    }
}

impl FromStr for RecordType {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "PTR" => Ok(RecordType::PTR),
            other => Err(DnsError::InvalidInput(format!(
                "Unsupported record type: '{}'",
                other
            ))),
        }
    }
}

/// What already exists at a name for a given record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// No records of that type
    None,
    /// A record with the requested value is already present
    Identical,
    /// Records exist, all with other values
    Collision,
}

/// Errors from DNS record operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collision: {0}")]
    Collision(String),

    /// The DNS authority rejected or failed the request
    #[error("DNS backend error: {0}")]
    Backend(String),
}

/// Answers which values currently exist for a name
#[async_trait]
pub trait RecordLookup: Send + Sync {
    async fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, DnsError>;
}

/// Writes records to the DNS authority
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn create(&self, name: &str, value: &str, record_type: RecordType) -> Result<(), DnsError>;

    /// Remove every record of `record_type` at `name`; `NotFound` if there is none
    async fn remove(&self, name: &str, record_type: RecordType) -> Result<(), DnsError>;
}

/// A DNS authority that can be both queried and written
pub trait DnsBackend: RecordLookup + RecordBackend {}

impl<T: RecordLookup + RecordBackend + ?Sized> DnsBackend for T {}

#[async_trait]
impl<T: RecordLookup + ?Sized> RecordLookup for Arc<T> {
    async fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, DnsError> {
        (**self).lookup(name, record_type).await
    }
}

#[async_trait]
impl<T: RecordBackend + ?Sized> RecordBackend for Arc<T> {
    async fn create(&self, name: &str, value: &str, record_type: RecordType) -> Result<(), DnsError> {
        (**self).create(name, value, record_type).await
    }

    async fn remove(&self, name: &str, record_type: RecordType) -> Result<(), DnsError> {
        (**self).remove(name, record_type).await
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// Accept `1.2.3.4` where a reverse name is expected, converting it
fn reverse_name(ptr: &str) -> String {
    match ptr.parse::<IpAddr>() {
        Ok(ip) => {
            warn!(
                "PTR operation given an IP address ({}); pass the reverse name instead",
                ptr
            );
            ip_to_ptr(ip)
        }
        Err(_) => ptr.to_string(),
    }
}

/// Conflict-checked record operations over a DNS backend
pub struct DnsRecordManager<B> {
    backend: B,
}

impl<B: RecordLookup + RecordBackend> DnsRecordManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn ip_conflicts(
        &self,
        fqdn: &str,
        record_type: RecordType,
        ip: &str,
    ) -> Result<Conflict, DnsError> {
        let wanted: IpAddr = ip
            .parse()
            .map_err(|_| DnsError::InvalidInput(format!("Not an IP Address: '{}'", ip)))?;

        let existing = self.backend.lookup(fqdn, record_type).await?;
        if existing.is_empty() {
            return Ok(Conflict::None);
        }
        if existing
            .iter()
            .any(|value| value.parse::<IpAddr>().map_or(false, |addr| addr == wanted))
        {
            return Ok(Conflict::Identical);
        }
        Ok(Conflict::Collision)
    }

    async fn name_conflicts(
        &self,
        name: &str,
        record_type: RecordType,
        target: &str,
    ) -> Result<Conflict, DnsError> {
        let existing = self.backend.lookup(name, record_type).await?;
        if existing.is_empty() {
            return Ok(Conflict::None);
        }
        if existing.iter().any(|value| same_name(value, target)) {
            return Ok(Conflict::Identical);
        }
        Ok(Conflict::Collision)
    }

    pub async fn a_record_conflicts(&self, fqdn: &str, ip: &str) -> Result<Conflict, DnsError> {
        self.ip_conflicts(fqdn, RecordType::A, ip).await
    }

    pub async fn aaaa_record_conflicts(&self, fqdn: &str, ip: &str) -> Result<Conflict, DnsError> {
        self.ip_conflicts(fqdn, RecordType::AAAA, ip).await
    }

    pub async fn cname_record_conflicts(
        &self,
        fqdn: &str,
        target: &str,
    ) -> Result<Conflict, DnsError> {
        self.name_conflicts(fqdn, RecordType::CNAME, target).await
    }

    /// Does `ptr` (a reverse name) already point somewhere other than `fqdn`?
    pub async fn ptr_record_conflicts(&self, fqdn: &str, ptr: &str) -> Result<Conflict, DnsError> {
        self.name_conflicts(&reverse_name(ptr), RecordType::PTR, fqdn)
            .await
    }

    async fn create_checked(
        &self,
        conflict: Conflict,
        name: &str,
        value: &str,
        record_type: RecordType,
    ) -> Result<bool, DnsError> {
        match conflict {
            Conflict::Collision => Err(DnsError::Collision(format!("'{}' is already in use", name))),
            Conflict::Identical => {
                debug!("{} record {} -> {} already present", record_type, name, value);
                Ok(false)
            }
            Conflict::None => {
                self.backend.create(name, value, record_type).await?;
                info!("Created {} record {} -> {}", record_type, name, value);
                Ok(true)
            }
        }
    }

    /// Create an A record. `Ok(false)` when it already exists.
    pub async fn create_a_record(&self, fqdn: &str, ip: &str) -> Result<bool, DnsError> {
        let conflict = self.a_record_conflicts(fqdn, ip).await?;
        self.create_checked(conflict, fqdn, ip, RecordType::A).await
    }

    pub async fn create_aaaa_record(&self, fqdn: &str, ip: &str) -> Result<bool, DnsError> {
        let conflict = self.aaaa_record_conflicts(fqdn, ip).await?;
        self.create_checked(conflict, fqdn, ip, RecordType::AAAA).await
    }

    pub async fn create_cname_record(&self, fqdn: &str, target: &str) -> Result<bool, DnsError> {
        let conflict = self.cname_record_conflicts(fqdn, target).await?;
        self.create_checked(conflict, fqdn, target, RecordType::CNAME)
            .await
    }

    /// Create a PTR record at `ptr` pointing to `fqdn`
    pub async fn create_ptr_record(&self, fqdn: &str, ptr: &str) -> Result<bool, DnsError> {
        let ptr = reverse_name(ptr);
        let conflict = self.name_conflicts(&ptr, RecordType::PTR, fqdn).await?;
        self.create_checked(conflict, &ptr, fqdn, RecordType::PTR).await
    }

    /// Create a record of any supported type.
    ///
    /// For PTR records `value` is the reverse name and `fqdn` its target.
    pub async fn create_record(
        &self,
        fqdn: &str,
        value: &str,
        record_type: RecordType,
    ) -> Result<bool, DnsError> {
        match record_type {
            RecordType::A => self.create_a_record(fqdn, value).await,
            RecordType::AAAA => self.create_aaaa_record(fqdn, value).await,
            RecordType::CNAME => self.create_cname_record(fqdn, value).await,
            RecordType::PTR => self.create_ptr_record(fqdn, value).await,
        }
    }

    pub async fn remove_a_record(&self, fqdn: &str) -> Result<(), DnsError> {
        self.remove_record(fqdn, RecordType::A).await
    }

    pub async fn remove_aaaa_record(&self, fqdn: &str) -> Result<(), DnsError> {
        self.remove_record(fqdn, RecordType::AAAA).await
    }

    pub async fn remove_cname_record(&self, fqdn: &str) -> Result<(), DnsError> {
        self.remove_record(fqdn, RecordType::CNAME).await
    }

    pub async fn remove_ptr_record(&self, ptr: &str) -> Result<(), DnsError> {
        self.remove_record(&reverse_name(ptr), RecordType::PTR).await
    }

    pub async fn remove_record(&self, name: &str, record_type: RecordType) -> Result<(), DnsError> {
        self.backend.remove(name, record_type).await?;
        info!("Removed {} record {}", record_type, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    /// Zone kept in memory, keyed by lowercase name and type
    #[derive(Default)]
    struct MemoryZone {
        records: Mutex<HashMap<(String, RecordType), Vec<String>>>,
    }

    impl MemoryZone {
        fn with(records: &[(&str, RecordType, &str)]) -> Self {
            let zone = Self::default();
            for (name, record_type, value) in records {
                zone.records
                    .lock()
                    .entry((name.to_lowercase(), *record_type))
                    .or_default()
                    .push(value.to_string());
            }
            zone
        }

        fn values(&self, name: &str, record_type: RecordType) -> Vec<String> {
            self.records
                .lock()
                .get(&(name.to_lowercase(), record_type))
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl RecordLookup for MemoryZone {
        async fn lookup(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, DnsError> {
            Ok(self.values(name, record_type))
        }
    }

    #[async_trait]
    impl RecordBackend for MemoryZone {
        async fn create(&self, name: &str, value: &str, record_type: RecordType) -> Result<(), DnsError> {
            self.records
                .lock()
                .entry((name.to_lowercase(), record_type))
                .or_default()
                .push(value.to_string());
            Ok(())
        }

        async fn remove(&self, name: &str, record_type: RecordType) -> Result<(), DnsError> {
            self.records
                .lock()
                .remove(&(name.to_lowercase(), record_type))
                .map(|_| ())
                .ok_or_else(|| DnsError::NotFound(format!("Cannot find DNS entry for {}", name)))
        }
    }

    #[tokio::test]
    async fn test_a_record_conflicts() {
        let manager = DnsRecordManager::new(MemoryZone::with(&[(
            "host.example.com",
            RecordType::A,
            "192.168.1.10",
        )]));

        assert_eq!(
            manager.a_record_conflicts("other.example.com", "192.168.1.10").await,
            Ok(Conflict::None)
        );
        assert_eq!(
            manager.a_record_conflicts("host.example.com", "192.168.1.10").await,
            Ok(Conflict::Identical)
        );
        assert_eq!(
            manager.a_record_conflicts("host.example.com", "192.168.1.11").await,
            Ok(Conflict::Collision)
        );
        assert_eq!(
            manager.a_record_conflicts("host.example.com", "not-an-ip").await,
            Err(DnsError::InvalidInput("Not an IP Address: 'not-an-ip'".to_string()))
        );
    }

    #[tokio::test]
    async fn test_aaaa_conflict_compares_addresses_not_text() {
        let manager = DnsRecordManager::new(MemoryZone::with(&[(
            "host.example.com",
            RecordType::AAAA,
            "2001:db8:0:0:0:0:0:1",
        )]));

        assert_eq!(
            manager.aaaa_record_conflicts("host.example.com", "2001:db8::1").await,
            Ok(Conflict::Identical)
        );
    }

    #[tokio::test]
    async fn test_cname_conflict_is_case_insensitive() {
        let manager = DnsRecordManager::new(MemoryZone::with(&[(
            "www.example.com",
            RecordType::CNAME,
            "Web.Example.com.",
        )]));

        assert_eq!(
            manager.cname_record_conflicts("www.example.com", "web.example.com").await,
            Ok(Conflict::Identical)
        );
        assert_eq!(
            manager.cname_record_conflicts("www.example.com", "cdn.example.com").await,
            Ok(Conflict::Collision)
        );
    }

    #[tokio::test]
    async fn test_create_a_record_outcomes() {
        let manager = DnsRecordManager::new(MemoryZone::default());

        assert!(assert_ok!(manager.create_a_record("host.example.com", "10.0.0.1").await));
        assert!(!assert_ok!(manager.create_a_record("host.example.com", "10.0.0.1").await));
        assert_eq!(
            assert_err!(manager.create_a_record("host.example.com", "10.0.0.2").await),
            DnsError::Collision("'host.example.com' is already in use".to_string())
        );
        assert_eq!(manager.backend().values("host.example.com", RecordType::A), vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_create_ptr_record_accepts_reverse_name_or_ip() {
        let manager = DnsRecordManager::new(MemoryZone::default());

        assert_ok!(
            manager
                .create_ptr_record("host.example.com", "10.1.168.192.in-addr.arpa")
                .await
        );
        assert_eq!(
            manager.backend().values("10.1.168.192.in-addr.arpa", RecordType::PTR),
            vec!["host.example.com"]
        );

        assert_eq!(
            manager.ptr_record_conflicts("host.example.com", "192.168.1.10").await,
            Ok(Conflict::Identical)
        );
        assert_eq!(
            assert_err!(manager.create_ptr_record("other.example.com", "192.168.1.10").await),
            DnsError::Collision("'10.1.168.192.in-addr.arpa' is already in use".to_string())
        );
    }

    #[tokio::test]
    async fn test_create_record_dispatches_by_type() {
        let manager = DnsRecordManager::new(MemoryZone::default());

        assert_ok!(manager.create_record("www.example.com", "web.example.com", RecordType::CNAME).await);
        assert_ok!(manager.create_record("host.example.com", "2001:db8::5", RecordType::AAAA).await);

        assert_eq!(
            manager.backend().values("www.example.com", RecordType::CNAME),
            vec!["web.example.com"]
        );
        assert_eq!(
            manager.backend().values("host.example.com", RecordType::AAAA),
            vec!["2001:db8::5"]
        );
    }

    #[tokio::test]
    async fn test_remove_records() {
        let manager = DnsRecordManager::new(MemoryZone::with(&[
            ("host.example.com", RecordType::A, "10.0.0.1"),
            ("1.0.0.10.in-addr.arpa", RecordType::PTR, "host.example.com"),
        ]));

        assert_ok!(manager.remove_a_record("host.example.com").await);
        assert_ok!(manager.remove_ptr_record("10.0.0.1").await);
        assert!(matches!(
            manager.remove_cname_record("host.example.com").await,
            Err(DnsError::NotFound(_))
        ));
    }

    #[test]
    fn test_record_type_parsing() {
        assert_eq!("aaaa".parse::<RecordType>(), Ok(RecordType::AAAA));
        assert_eq!("PTR".parse::<RecordType>(), Ok(RecordType::PTR));
        assert!("MX".parse::<RecordType>().is_err());
        assert_eq!(RecordType::CNAME.to_string(), "CNAME");
    }
}
