//! Transport that logs packets instead of putting them on the wire.
//!
//! Packet encoding and multicast sockets live outside this daemon; this
//! transport lets the engine run end to end and shows what it would send.

use beacon_core::{InterfaceSpec, PacketKind, Record, Transport, TransportError};
use tracing::debug;

/// Per-kind packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub probes: u64,
    pub responses: u64,
    pub goodbyes: u64,
}

#[derive(Debug, Default)]
pub struct LoggingTransport {
    stats: PacketStats,
}

impl LoggingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PacketStats {
        self.stats
    }
}

impl Transport for LoggingTransport {
    fn send(
        &mut self,
        interface: &InterfaceSpec,
        record: &Record,
        ttl: u32,
        kind: PacketKind,
    ) -> Result<(), TransportError> {
        match kind {
            PacketKind::Probe => self.stats.probes += 1,
            PacketKind::Response => self.stats.responses += 1,
            PacketKind::Goodbye => self.stats.goodbyes += 1,
        }
        debug!(
            interface = %interface,
            key = %record.key,
            ttl,
            ?kind,
            bytes = record.rdata.len(),
            "packet"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::Protocol;

    #[test]
    fn test_counts_packets_by_kind() {
        let mut transport = LoggingTransport::new();
        let iface = InterfaceSpec::new(2, "eth0", Protocol::Inet);
        let record = Record::address("nas.local", "192.168.1.20".parse().unwrap(), 120);

        transport.send(&iface, &record, 120, PacketKind::Probe).unwrap();
        transport.send(&iface, &record, 120, PacketKind::Probe).unwrap();
        transport.send(&iface, &record, 0, PacketKind::Goodbye).unwrap();

        assert_eq!(
            transport.stats(),
            PacketStats {
                probes: 2,
                responses: 0,
                goodbyes: 1,
            }
        );
    }
}
