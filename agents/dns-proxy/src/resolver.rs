//! Reverse DNS Names
//!
//! Conversions between IP addresses and their `in-addr.arpa` /
//! `ip6.arpa` PTR names.

use std::net::IpAddr;

use crate::record::DnsError;

const IPV4_SUFFIX: &str = ".in-addr.arpa";
const IPV6_SUFFIX: &str = ".ip6.arpa";

/// Address a PTR name refers to.
///
/// IPv6 names yield full four-digit groups, e.g. `2001:0db8:0000:...`.
pub fn ptr_to_ip(ptr: &str) -> Result<String, DnsError> {
    let ptr = ptr.trim_end_matches('.');

    if let Some(labels) = ptr.strip_suffix(IPV4_SUFFIX) {
        let mut octets: Vec<&str> = labels.split('.').collect();
        octets.reverse();
        return Ok(octets.join("."));
    }

    if let Some(labels) = ptr.strip_suffix(IPV6_SUFFIX) {
        let mut nibbles: Vec<&str> = labels.split('.').collect();
        nibbles.reverse();
        let groups: Vec<String> = nibbles.chunks(4).map(|group| group.concat()).collect();
        return Ok(groups.join(":"));
    }

    Err(DnsError::InvalidInput(format!("Not a PTR address: '{}'", ptr)))
}

/// PTR name for an address
pub fn ip_to_ptr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}{}", d, c, b, a, IPV4_SUFFIX)
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|byte| [byte & 0x0f, byte >> 4])
                .map(|nibble| format!("{:x}", nibble))
                .collect();
            format!("{}{}", nibbles.join("."), IPV6_SUFFIX)
        }
    }
}
