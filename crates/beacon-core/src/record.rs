//! Resource records as the engine sees them.
//!
//! The engine never encodes records for the wire; it only needs the
//! fingerprint (name, type, class) to match claims, the payload bytes to tell
//! two claims apart, and the TTL to pace refreshes and goodbyes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::error::{CoreError, CoreResult};

/// The Internet class.
pub const CLASS_IN: u16 = 1;

/// TTL for host name records (A, AAAA and their reverse PTRs).
pub const DEFAULT_TTL_HOST_NAME: u32 = 120;

const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_RDATA_LEN: usize = u16::MAX as usize;

/// Record types the responder publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
    /// Any other type, by numeric code.
    Other(u16),
}

impl RecordType {
    /// Numeric type code.
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ptr => 12,
            RecordType::Aaaa => 28,
            RecordType::Other(code) => *code,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Aaaa => write!(f, "AAAA"),
            RecordType::Ptr => write!(f, "PTR"),
            RecordType::Other(code) => write!(f, "TYPE{code}"),
        }
    }
}

/// Record fingerprint: (name, type, class).
///
/// Names compare ASCII case-insensitively and ignore a trailing dot, but keep
/// their original spelling for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordKey {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
}

impl RecordKey {
    pub fn new(name: impl Into<String>, rtype: RecordType) -> Self {
        Self {
            name: name.into(),
            rtype,
            class: CLASS_IN,
        }
    }

    fn canonical_name(&self) -> &str {
        self.name.strip_suffix('.').unwrap_or(&self.name)
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.rtype == other.rtype
            && self.class == other.class
            && self
                .canonical_name()
                .eq_ignore_ascii_case(other.canonical_name())
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.canonical_name().bytes() {
            b.to_ascii_lowercase().hash(state);
        }
        self.rtype.hash(state);
        self.class.hash(state);
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IN {}", self.name, self.rtype)
    }
}

/// A record: fingerprint, opaque payload and TTL in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub rdata: Vec<u8>,
    pub ttl: u32,
}

impl Record {
    pub fn new(key: RecordKey, rdata: impl Into<Vec<u8>>, ttl: u32) -> Self {
        Self {
            key,
            rdata: rdata.into(),
            ttl,
        }
    }

    /// An A or AAAA record for `name`.
    pub fn address(name: impl Into<String>, addr: IpAddr, ttl: u32) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::new(RecordKey::new(name, RecordType::A), v4.octets(), ttl),
            IpAddr::V6(v6) => Self::new(RecordKey::new(name, RecordType::Aaaa), v6.octets(), ttl),
        }
    }

    /// A PTR record from `name` to `target`.
    pub fn ptr(name: impl Into<String>, target: &str, ttl: u32) -> Self {
        Self::new(
            RecordKey::new(name, RecordType::Ptr),
            target.as_bytes().to_vec(),
            ttl,
        )
    }

    /// The name this record claims.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// The same record with TTL 0, used to withdraw it from peer caches.
    pub fn goodbye(&self) -> Self {
        Self {
            ttl: 0,
            ..self.clone()
        }
    }

    /// Total order used to break ties between simultaneous probes.
    ///
    /// Compares class, then type, then payload bytes. TTL does not take part.
    pub fn lexicographical_cmp(&self, other: &Record) -> Ordering {
        self.key
            .class
            .cmp(&other.key.class)
            .then_with(|| self.key.rtype.code().cmp(&other.key.rtype.code()))
            .then_with(|| self.rdata.cmp(&other.rdata))
    }

    /// Same fingerprint and same payload, ignoring TTL.
    pub fn same_claim(&self, other: &Record) -> bool {
        self.key == other.key && self.rdata == other.rdata
    }

    /// Check that the record can be published.
    pub fn validate(&self) -> CoreResult<()> {
        let name = self.key.canonical_name();
        if name.is_empty() {
            return Err(CoreError::invalid_record("empty name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(CoreError::invalid_record(format!(
                "name longer than {MAX_NAME_LEN} bytes: {}",
                self.key.name
            )));
        }
        if let Some(label) = name
            .split('.')
            .find(|label| label.is_empty() || label.len() > MAX_LABEL_LEN)
        {
            return Err(CoreError::invalid_record(format!(
                "bad label {label:?} in {}",
                self.key.name
            )));
        }
        if self.rdata.len() > MAX_RDATA_LEN {
            return Err(CoreError::invalid_record(format!(
                "payload of {} bytes for {}",
                self.rdata.len(),
                self.key.name
            )));
        }
        Ok(())
    }
}

/// Reverse lookup name for an address (`in-addr.arpa` / `ip6.arpa`).
pub fn reverse_lookup_name(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa")
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

/// Next candidate name after a collision: `foo` → `foo-2`, `foo-2` → `foo-3`.
///
/// Only the first label is rewritten, so `foo.local` becomes `foo-2.local`.
pub fn alternative_name(name: &str) -> String {
    let (label, rest) = match name.split_once('.') {
        Some((label, rest)) => (label, Some(rest)),
        None => (name, None),
    };

    let renamed = match label.rsplit_once('-') {
        Some((stem, suffix))
            if !stem.is_empty()
                && !suffix.is_empty()
                && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            match suffix.parse::<u64>().ok().filter(|n| *n >= 2) {
                Some(n) => match n.checked_add(1) {
                    Some(next) => format!("{stem}-{next}"),
                    None => format!("{label}-2"),
                },
                None => format!("{label}-2"),
            }
        }
        _ => format!("{label}-2"),
    };

    match rest {
        Some(rest) => format!("{renamed}.{rest}"),
        None => renamed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_key_equality_ignores_case_and_trailing_dot() {
        let a = RecordKey::new("Foo.Local.", RecordType::A);
        let b = RecordKey::new("foo.local", RecordType::A);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_key_differs_by_type() {
        let a = RecordKey::new("foo.local", RecordType::A);
        let aaaa = RecordKey::new("foo.local", RecordType::Aaaa);
        assert_ne!(a, aaaa);
    }

    #[test]
    fn test_address_record_payload() {
        let v4 = Record::address("foo.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 120);
        assert_eq!(v4.key.rtype, RecordType::A);
        assert_eq!(v4.rdata, vec![10, 0, 0, 7]);

        let v6 = Record::address("foo.local", IpAddr::V6(Ipv6Addr::LOCALHOST), 120);
        assert_eq!(v6.key.rtype, RecordType::Aaaa);
        assert_eq!(v6.rdata.len(), 16);
    }

    #[test]
    fn test_goodbye_keeps_claim_with_zero_ttl() {
        let record = Record::address("foo.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 120);
        let goodbye = record.goodbye();
        assert_eq!(goodbye.ttl, 0);
        assert!(goodbye.same_claim(&record));
    }

    #[test]
    fn test_lexicographical_cmp_orders_by_payload() {
        let low = Record::address("foo.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 120);
        let high = Record::address("foo.local", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 4500);
        assert_eq!(low.lexicographical_cmp(&high), Ordering::Less);
        assert_eq!(high.lexicographical_cmp(&low), Ordering::Greater);
        assert_eq!(low.lexicographical_cmp(&low.goodbye()), Ordering::Equal);
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let empty = Record::new(RecordKey::new("", RecordType::A), vec![0; 4], 120);
        assert!(empty.validate().is_err());

        let double_dot = Record::new(RecordKey::new("foo..local", RecordType::A), vec![0; 4], 120);
        assert!(double_dot.validate().is_err());

        let long_label = Record::new(
            RecordKey::new(format!("{}.local", "a".repeat(64)), RecordType::A),
            vec![0; 4],
            120,
        );
        assert!(long_label.validate().is_err());

        let fine = Record::new(RecordKey::new("foo.local.", RecordType::A), vec![0; 4], 120);
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn test_reverse_lookup_name_v4() {
        let addr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(reverse_lookup_name(&addr), "20.1.168.192.in-addr.arpa");
    }

    #[test]
    fn test_reverse_lookup_name_v6() {
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        let name = reverse_lookup_name(&addr);
        assert!(name.starts_with("1.0.0.0."));
        assert!(name.ends_with(".8.b.d.0.1.0.0.2.ip6.arpa"));
    }

    #[test]
    fn test_alternative_name() {
        assert_eq!(alternative_name("foo"), "foo-2");
        assert_eq!(alternative_name("foo-2"), "foo-3");
        assert_eq!(alternative_name("foo-9.local"), "foo-10.local");
        assert_eq!(alternative_name("foo.local"), "foo-2.local");
        assert_eq!(alternative_name("foo-bar.local"), "foo-bar-2.local");
        assert_eq!(alternative_name("foo-1"), "foo-1-2");
    }

    #[test]
    fn test_alternative_name_with_huge_suffix() {
        assert_eq!(
            alternative_name("nas-18446744073709551615.local"),
            "nas-18446744073709551615-2.local"
        );
        assert_eq!(
            alternative_name("nas-18446744073709551614"),
            "nas-18446744073709551615"
        );
        // Longer than any u64.
        assert_eq!(
            alternative_name("nas-99999999999999999999999"),
            "nas-99999999999999999999999-2"
        );
    }

    #[test]
    fn test_other_record_type_code() {
        let txt = RecordKey::new("foo.local", RecordType::Other(16));
        assert_eq!(txt.rtype.code(), 16);
        assert_eq!(txt.to_string(), "foo.local IN TYPE16");
    }
}
