//! A transport that records packets instead of sending them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use beacon_core::{InterfaceSpec, PacketKind, Record, Transport, TransportError};

/// A packet handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// Interface the packet went out on.
    pub interface: InterfaceSpec,
    /// The record as published (TTL inside is the entry's TTL).
    pub record: Record,
    /// TTL on the wire; 0 for goodbyes.
    pub ttl: u32,
    pub kind: PacketKind,
}

impl SentPacket {
    pub fn name(&self) -> &str {
        self.record.name()
    }
}

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<SentPacket>,
    failures: VecDeque<TransportError>,
    broken: Option<String>,
}

/// A transport that records every successful send.
///
/// Clones share the same log, so a test keeps one clone for inspection
/// while the responder owns the other.
///
/// # Example
///
/// ```rust,ignore
/// let transport = RecordingTransport::new();
/// let mut responder = Responder::new(EngineConfig::default(), transport.clone(), Instant::now());
/// // ... drive the responder ...
/// assert_eq!(transport.count(PacketKind::Goodbye), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded packet, oldest first.
    pub fn packets(&self) -> Vec<SentPacket> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Number of recorded packets of one kind.
    pub fn count(&self, kind: PacketKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|packet| packet.kind == kind)
            .count()
    }

    /// Number of recorded packets of one kind for one name.
    pub fn count_for(&self, name: &str, kind: PacketKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|packet| packet.kind == kind && packet.name().eq_ignore_ascii_case(name))
            .count()
    }

    /// Number of recorded packets sent on the interface with this index.
    pub fn count_on(&self, index: u32, kind: PacketKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|packet| packet.kind == kind && packet.interface.index == index)
            .count()
    }

    /// Make the next send fail with `err`. Queued failures are used in order.
    pub fn fail_next(&self, err: TransportError) {
        self.inner.lock().unwrap().failures.push_back(err);
    }

    /// Make every send from now on fail fatally.
    pub fn break_down(&self, reason: impl Into<String>) {
        self.inner.lock().unwrap().broken = Some(reason.into());
    }

    /// Undo [`RecordingTransport::break_down`].
    pub fn repair(&self) {
        self.inner.lock().unwrap().broken = None;
    }
}

impl Transport for RecordingTransport {
    fn send(
        &mut self,
        interface: &InterfaceSpec,
        record: &Record,
        ttl: u32,
        kind: PacketKind,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = &inner.broken {
            return Err(TransportError::Fatal(reason.clone()));
        }
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.sent.push(SentPacket {
            interface: interface.clone(),
            record: record.clone(),
            ttl,
            kind,
        });
        Ok(())
    }
}
