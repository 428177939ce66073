//! Publishes this machine's host name and renames it on conflict.

use beacon_core::{
    alternative_name, CoreResult, EntryGroupState, GroupEvent, GroupId, InterfaceScope,
    PublishFlags, Responder, Transport,
};
use std::net::IpAddr;
use tracing::{error, info, warn};

/// Where the host name publisher stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Registering,
    Established,
    /// Out of rename attempts.
    GaveUp,
    /// The transport failed; not retried.
    Failed,
}

/// Claims `name` for a set of addresses.
///
/// On `Collision` the name is replaced by its alternative (`nas` → `nas-2`)
/// and the group recommitted, up to `max_renames` times. `Failure` is a
/// local fault and is not retried.
#[derive(Debug)]
pub struct HostNamePublisher {
    name: String,
    addresses: Vec<IpAddr>,
    group: Option<GroupId>,
    renames: u32,
    max_renames: u32,
    state: PublisherState,
}

impl HostNamePublisher {
    pub fn new(name: impl Into<String>, addresses: Vec<IpAddr>, max_renames: u32) -> Self {
        Self {
            name: name.into(),
            addresses,
            group: None,
            renames: 0,
            max_renames,
            state: PublisherState::Idle,
        }
    }

    /// The name currently claimed (or being claimed).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    #[cfg(test)]
    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    #[cfg(test)]
    pub fn renames(&self) -> u32 {
        self.renames
    }

    /// Add the address records for the current name and commit.
    pub fn publish<T: Transport>(&mut self, responder: &mut Responder<T>) -> CoreResult<()> {
        let group = *self.group.get_or_insert_with(|| responder.create_group());
        for addr in &self.addresses {
            responder.add_address(
                Some(group),
                InterfaceScope::ANY,
                PublishFlags::unique(),
                &self.name,
                *addr,
            )?;
        }
        responder.commit_group(group)?;
        self.state = PublisherState::Registering;
        info!(name = %self.name, addresses = self.addresses.len(), "publishing host name");
        Ok(())
    }

    /// React to a group state change. Returns whether the event was ours.
    pub fn handle_event<T: Transport>(
        &mut self,
        responder: &mut Responder<T>,
        event: &GroupEvent,
    ) -> CoreResult<bool> {
        if self.group != Some(event.group) {
            return Ok(false);
        }

        match event.state {
            EntryGroupState::Established => {
                self.state = PublisherState::Established;
                info!(name = %self.name, "host name established");
            }
            EntryGroupState::Collision => self.rename(responder)?,
            EntryGroupState::Failure => {
                self.state = PublisherState::Failed;
                let reason = responder
                    .group(event.group)
                    .and_then(|g| g.last_error())
                    .unwrap_or("unknown error");
                error!(name = %self.name, %reason, "host name registration failed");
            }
            EntryGroupState::Registering => self.state = PublisherState::Registering,
            EntryGroupState::Uncommitted => {}
        }
        Ok(true)
    }

    fn rename<T: Transport>(&mut self, responder: &mut Responder<T>) -> CoreResult<()> {
        if self.renames >= self.max_renames {
            self.state = PublisherState::GaveUp;
            error!(
                name = %self.name,
                attempts = self.renames,
                "host name conflict, giving up"
            );
            return Ok(());
        }

        let next = alternative_name(&self.name);
        warn!(from = %self.name, to = %next, "host name conflict, renaming");
        self.renames += 1;
        self.name = next;

        if let Some(group) = self.group {
            responder.reset_group(group)?;
        }
        self.publish(responder)
    }

    /// Release the group, sending goodbyes.
    pub fn withdraw<T: Transport>(&mut self, responder: &mut Responder<T>) -> CoreResult<()> {
        if let Some(group) = self.group.take() {
            responder.free_group(group)?;
        }
        self.state = PublisherState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::PacketKind;
    use beacon_test_utils::{fixtures, RecordingTransport, VirtualClock};
    use std::time::Duration;

    fn collide<T: Transport>(r: &mut Responder<T>, publisher: &HostNamePublisher) {
        let group = publisher.group().unwrap();
        let entry = r.group(group).unwrap().entries()[0];
        let iface = r.interface_ids()[0];
        r.notify_conflict(entry, iface);
    }

    fn pump<T: Transport>(
        r: &mut Responder<T>,
        publisher: &mut HostNamePublisher,
        events: &mut tokio::sync::mpsc::UnboundedReceiver<GroupEvent>,
    ) {
        while let Ok(event) = events.try_recv() {
            publisher.handle_event(r, &event).unwrap();
        }
    }

    #[test]
    fn test_publish_and_establish() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));
        let mut events = r.subscribe();

        let mut publisher = HostNamePublisher::new("nas.local", vec![fixtures::v4(20)], 3);
        publisher.publish(&mut r).unwrap();
        assert_eq!(publisher.state(), PublisherState::Registering);

        clock.advance(&mut r, Duration::from_secs(5)).unwrap();
        pump(&mut r, &mut publisher, &mut events);
        assert_eq!(publisher.state(), PublisherState::Established);
        assert_eq!(transport.count_for("nas.local", PacketKind::Response), 3);
    }

    #[test]
    fn test_collision_renames_and_recommits() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));
        let mut events = r.subscribe();

        let mut publisher = HostNamePublisher::new("nas.local", vec![fixtures::v4(20)], 3);
        publisher.publish(&mut r).unwrap();
        clock.advance(&mut r, Duration::from_millis(300)).unwrap();

        collide(&mut r, &publisher);
        pump(&mut r, &mut publisher, &mut events);
        assert_eq!(publisher.name(), "nas-2.local");
        assert_eq!(publisher.renames(), 1);

        clock.advance(&mut r, Duration::from_secs(5)).unwrap();
        pump(&mut r, &mut publisher, &mut events);
        assert_eq!(publisher.state(), PublisherState::Established);
        assert_eq!(transport.count_for("nas-2.local", PacketKind::Response), 3);
        assert_eq!(transport.count_for("nas.local", PacketKind::Response), 0);
    }

    #[test]
    fn test_gives_up_after_max_renames() {
        let clock = VirtualClock::new();
        let mut r = clock.responder(RecordingTransport::new());
        r.add_interface(fixtures::eth(1));
        let mut events = r.subscribe();

        let mut publisher = HostNamePublisher::new("nas.local", vec![fixtures::v4(20)], 2);
        publisher.publish(&mut r).unwrap();
        for _ in 0..3 {
            clock.advance(&mut r, Duration::from_millis(100)).unwrap();
            collide(&mut r, &publisher);
            pump(&mut r, &mut publisher, &mut events);
        }

        assert_eq!(publisher.state(), PublisherState::GaveUp);
        assert_eq!(publisher.name(), "nas-3.local");
        assert_eq!(r.announcements().count(), 0);
    }

    #[test]
    fn test_failure_is_terminal() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));
        let mut events = r.subscribe();

        let mut publisher = HostNamePublisher::new("nas.local", vec![fixtures::v4(20)], 3);
        publisher.publish(&mut r).unwrap();
        transport.break_down("no route");
        assert!(clock.advance(&mut r, Duration::from_secs(1)).is_err());
        pump(&mut r, &mut publisher, &mut events);

        assert_eq!(publisher.state(), PublisherState::Failed);
        assert_eq!(publisher.name(), "nas.local");
        assert_eq!(publisher.renames(), 0);
    }

    #[test]
    fn test_withdraw_sends_goodbyes() {
        let clock = VirtualClock::new();
        let transport = RecordingTransport::new();
        let mut r = clock.responder(transport.clone());
        r.add_interface(fixtures::eth(1));

        let mut publisher =
            HostNamePublisher::new("nas.local", vec![fixtures::v4(20), fixtures::v6(20)], 3);
        publisher.publish(&mut r).unwrap();
        clock.advance(&mut r, Duration::from_secs(5)).unwrap();

        publisher.withdraw(&mut r).unwrap();
        assert_eq!(transport.count(PacketKind::Goodbye), 4);
        assert!(publisher.group().is_none());
    }

    #[test]
    fn test_events_for_other_groups_are_ignored() {
        let clock = VirtualClock::new();
        let mut r = clock.responder(RecordingTransport::new());
        let other = r.create_group();
        let mut publisher = HostNamePublisher::new("nas.local", vec![fixtures::v4(20)], 3);
        publisher.publish(&mut r).unwrap();

        let event = GroupEvent {
            group: other,
            state: EntryGroupState::Collision,
        };
        assert!(!publisher.handle_event(&mut r, &event).unwrap());
        assert_eq!(publisher.name(), "nas.local");
    }
}
