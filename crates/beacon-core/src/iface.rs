//! Interfaces the responder announces on.
//!
//! An interface here is a (link, protocol family) pair. Enumerating links is
//! somebody else's job; the engine is told about them through
//! [`Responder::add_interface`](crate::Responder::add_interface).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::announce::AnnouncementId;
use crate::handle::define_handle;

define_handle!(
    /// Handle to an interface registered with the responder.
    InterfaceId,
    "if"
);

/// Protocol family of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Inet,
    Inet6,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Inet => write!(f, "IPv4"),
            Protocol::Inet6 => write!(f, "IPv6"),
        }
    }
}

/// Static description of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    /// OS link index.
    pub index: u32,
    /// Link name, e.g. `eth0`.
    pub name: String,
    /// Protocol family.
    pub protocol: Protocol,
}

impl InterfaceSpec {
    pub fn new(index: u32, name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            index,
            name: name.into(),
            protocol,
        }
    }
}

impl fmt::Display for InterfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.protocol)
    }
}

/// Where an entry may be published. `None` means any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InterfaceScope {
    pub index: Option<u32>,
    pub protocol: Option<Protocol>,
}

impl InterfaceScope {
    /// Every interface, every protocol.
    pub const ANY: Self = Self {
        index: None,
        protocol: None,
    };

    /// One link, both protocols.
    pub fn link(index: u32) -> Self {
        Self {
            index: Some(index),
            protocol: None,
        }
    }

    /// Restrict to one protocol family.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Whether an entry with this scope is eligible on `spec`.
    pub fn matches(&self, spec: &InterfaceSpec) -> bool {
        self.index.map_or(true, |index| index == spec.index)
            && self.protocol.map_or(true, |protocol| protocol == spec.protocol)
    }

    /// Whether some interface could be matched by both scopes.
    pub fn overlaps(&self, other: &InterfaceScope) -> bool {
        let index_overlap = match (self.index, other.index) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let protocol_overlap = match (self.protocol, other.protocol) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        index_overlap && protocol_overlap
    }
}

/// A registered interface and the announcements running on it.
#[derive(Debug)]
pub struct Interface {
    pub(crate) id: InterfaceId,
    pub(crate) spec: InterfaceSpec,
    pub(crate) active: bool,
    pub(crate) announcements: HashSet<AnnouncementId>,
}

impl Interface {
    pub(crate) fn new(id: InterfaceId, spec: InterfaceSpec) -> Self {
        Self {
            id,
            spec,
            active: true,
            announcements: HashSet::new(),
        }
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn spec(&self) -> &InterfaceSpec {
        &self.spec
    }

    /// Whether the interface currently carries announcements.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of announcements bound to this interface.
    pub fn announcement_count(&self) -> usize {
        self.announcements.len()
    }

    /// Announcements bound to this interface, in handle order.
    pub(crate) fn announcement_ids(&self) -> Vec<AnnouncementId> {
        let mut ids: Vec<_> = self.announcements.iter().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_scope_matches_everything() {
        let eth0 = InterfaceSpec::new(2, "eth0", Protocol::Inet);
        let wlan6 = InterfaceSpec::new(3, "wlan0", Protocol::Inet6);
        assert!(InterfaceScope::ANY.matches(&eth0));
        assert!(InterfaceScope::ANY.matches(&wlan6));
    }

    #[test]
    fn test_link_scope_matches_one_index() {
        let scope = InterfaceScope::link(2);
        assert!(scope.matches(&InterfaceSpec::new(2, "eth0", Protocol::Inet)));
        assert!(scope.matches(&InterfaceSpec::new(2, "eth0", Protocol::Inet6)));
        assert!(!scope.matches(&InterfaceSpec::new(3, "wlan0", Protocol::Inet)));
    }

    #[test]
    fn test_protocol_scope() {
        let scope = InterfaceScope::ANY.with_protocol(Protocol::Inet6);
        assert!(!scope.matches(&InterfaceSpec::new(2, "eth0", Protocol::Inet)));
        assert!(scope.matches(&InterfaceSpec::new(2, "eth0", Protocol::Inet6)));
    }

    #[test]
    fn test_scope_overlap() {
        assert!(InterfaceScope::ANY.overlaps(&InterfaceScope::link(4)));
        assert!(!InterfaceScope::link(2).overlaps(&InterfaceScope::link(3)));
        assert!(!InterfaceScope::ANY
            .with_protocol(Protocol::Inet)
            .overlaps(&InterfaceScope::ANY.with_protocol(Protocol::Inet6)));
    }

    #[test]
    fn test_spec_display() {
        let spec = InterfaceSpec::new(2, "eth0", Protocol::Inet6);
        assert_eq!(spec.to_string(), "eth0.IPv6");
    }
}
