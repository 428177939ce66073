//! The transmit seam between the engine and the network.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::iface::InterfaceSpec;
use crate::record::Record;

/// What a transmitted packet means to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// A claim query sent while probing.
    Probe,
    /// An authoritative answer (announcement or refresh).
    Response,
    /// The record with TTL 0, withdrawing it from peer caches.
    Goodbye,
}

/// Send failures reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The packet was dropped; the next scheduled transmission retries.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// The transport cannot send anymore.
    #[error("fatal transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// Best-effort, non-blocking packet transmission.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Send `record` on `interface` with the given TTL.
    fn send(
        &mut self,
        interface: &InterfaceSpec,
        record: &Record,
        ttl: u32,
        kind: PacketKind,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &mut self,
        interface: &InterfaceSpec,
        record: &Record,
        ttl: u32,
        kind: PacketKind,
    ) -> Result<(), TransportError> {
        (**self).send(interface, record, ttl, kind)
    }
}
