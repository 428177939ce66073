//! Virtual time for driving a responder deterministically.

use std::time::{Duration, Instant};

use beacon_core::{CoreResult, EngineConfig, Responder, Transport};

/// Drives a [`Responder`] through virtual time.
///
/// Every timer fires at its own deadline, never late, so tests can reason
/// about exact offsets from [`VirtualClock::origin`].
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    origin: Instant,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant virtual time starts at.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// A responder with the default configuration starting at the origin.
    pub fn responder<T: Transport>(&self, transport: T) -> Responder<T> {
        self.responder_with(EngineConfig::default(), transport)
    }

    pub fn responder_with<T: Transport>(&self, config: EngineConfig, transport: T) -> Responder<T> {
        Responder::new(config, transport, self.origin)
    }

    /// Virtual time elapsed on the responder's clock.
    pub fn elapsed<T: Transport>(&self, responder: &Responder<T>) -> Duration {
        responder.now().saturating_duration_since(self.origin)
    }

    /// Fire everything due at the current instant.
    pub fn settle<T: Transport>(&self, responder: &mut Responder<T>) -> CoreResult<()> {
        let now = responder.now();
        responder.handle_timeout(now)
    }

    /// Advance by `span`, firing every timer on the way at its deadline.
    ///
    /// Stops at the first error; the clock is left at that timer's deadline.
    pub fn advance<T: Transport>(
        &self,
        responder: &mut Responder<T>,
        span: Duration,
    ) -> CoreResult<()> {
        let end = responder.now() + span;
        while let Some(deadline) = responder.poll_timeout() {
            if deadline > end {
                break;
            }
            responder.handle_timeout(deadline)?;
        }
        responder.handle_timeout(end)
    }

    /// Advance to `offset` after the origin. Does nothing if already past it.
    pub fn advance_to<T: Transport>(
        &self,
        responder: &mut Responder<T>,
        offset: Duration,
    ) -> CoreResult<()> {
        let elapsed = self.elapsed(responder);
        if offset <= elapsed {
            return Ok(());
        }
        self.advance(responder, offset - elapsed)
    }

    /// Fire timers one deadline at a time until `done` holds or `limit`
    /// virtual time has passed. Returns whether `done` was reached.
    pub fn run_until<T, F>(
        &self,
        responder: &mut Responder<T>,
        limit: Duration,
        mut done: F,
    ) -> CoreResult<bool>
    where
        T: Transport,
        F: FnMut(&Responder<T>) -> bool,
    {
        let end = responder.now() + limit;
        loop {
            if done(responder) {
                return Ok(true);
            }
            match responder.poll_timeout() {
                Some(deadline) if deadline <= end => responder.handle_timeout(deadline)?,
                _ => {
                    responder.handle_timeout(end)?;
                    return Ok(done(responder));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fixtures, RecordingTransport};
    use beacon_core::{InterfaceScope, PacketKind, PublishFlags};

    #[test]
    fn test_advance_fires_timers_at_their_deadlines() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));
        r.add_record(
            None,
            InterfaceScope::ANY,
            PublishFlags::unique(),
            fixtures::host_record("a.local", 1),
        )
        .unwrap();

        clock.advance(&mut r, Duration::from_millis(260)).unwrap();
        assert_eq!(transport.count(PacketKind::Probe), 2);
        assert_eq!(clock.elapsed(&r), Duration::from_millis(260));
    }

    #[test]
    fn test_run_until_stops_when_condition_holds() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));
        r.add_record(
            None,
            InterfaceScope::ANY,
            PublishFlags::shared(),
            fixtures::host_record("a.local", 1),
        )
        .unwrap();

        let probe = transport.clone();
        let reached = clock
            .run_until(&mut r, Duration::from_secs(10), |_| {
                probe.count(PacketKind::Response) == 2
            })
            .unwrap();
        assert!(reached);
        assert_eq!(clock.elapsed(&r), Duration::from_secs(1));
    }
}
