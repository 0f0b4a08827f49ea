//! DNS Proxy Library
//!
//! Conflict-checked A, AAAA, CNAME and PTR record management against a
//! remote DNS authority, with a Cloudflare-backed implementation.

pub mod cloudflare;
pub mod record;
pub mod resolver;

pub use cloudflare::CloudflareDnsBackend;
pub use record::{
    Conflict, DnsBackend, DnsError, DnsRecordManager, RecordBackend, RecordLookup, RecordType,
};
pub use resolver::{ip_to_ptr, ptr_to_ip};
