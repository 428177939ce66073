//! Helpers for the unit tests in this crate.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::iface::{InterfaceSpec, Protocol};
use crate::record::Record;
use crate::responder::Responder;
use crate::transport::{PacketKind, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub interface: InterfaceSpec,
    pub record: Record,
    pub ttl: u32,
    pub kind: PacketKind,
}

/// Records every successful send; `fail_next` makes the next send fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sent: Vec<SentPacket>,
    pub fail_next: Option<TransportError>,
}

impl RecordingSink {
    pub fn count(&self, kind: PacketKind) -> usize {
        self.sent.iter().filter(|packet| packet.kind == kind).count()
    }
}

impl Transport for RecordingSink {
    fn send(
        &mut self,
        interface: &InterfaceSpec,
        record: &Record,
        ttl: u32,
        kind: PacketKind,
    ) -> Result<(), TransportError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.sent.push(SentPacket {
            interface: interface.clone(),
            record: record.clone(),
            ttl,
            kind,
        });
        Ok(())
    }
}

pub fn responder() -> Responder<RecordingSink> {
    Responder::new(EngineConfig::default(), RecordingSink::default(), Instant::now())
}

pub fn eth(index: u32) -> InterfaceSpec {
    InterfaceSpec::new(index, format!("eth{index}"), Protocol::Inet)
}

/// `10.0.0.<n>`
pub fn v4(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
}

/// Fire every timer due within `span` at its own deadline, then move the
/// clock to the end of the span.
pub fn run_for<T: Transport>(r: &mut Responder<T>, span: Duration) {
    let end = r.now() + span;
    while let Some(deadline) = r.poll_timeout() {
        if deadline > end {
            break;
        }
        r.handle_timeout(deadline).unwrap();
    }
    r.handle_timeout(end).unwrap();
}
