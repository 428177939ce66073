//! The responder context: tables, clock, timers and the publishing API.
//!
//! Everything the engine owns lives in one [`Responder`] value passed by
//! `&mut` into every operation; there is no ambient global state. The
//! announcement state machine, group coordination and sweep operations are
//! implemented as further `impl` blocks in their own modules.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::announce::{Announcement, AnnouncementId};
use crate::config::EngineConfig;
use crate::entry::{Entry, EntryId, PublishFlags};
use crate::error::{CoreError, CoreResult};
use crate::group::{EntryGroup, EntryGroupState, GroupEvent, GroupId};
use crate::iface::{Interface, InterfaceId, InterfaceScope, InterfaceSpec};
use crate::record::{reverse_lookup_name, Record, DEFAULT_TTL_HOST_NAME};
use crate::timeq::{TimeEventQueue, TimerTarget};
use crate::transport::{Transport, TransportError};

/// Publishing engine for one host.
pub struct Responder<T: Transport> {
    pub(crate) config: EngineConfig,
    pub(crate) transport: T,
    pub(crate) clock: Instant,
    pub(crate) timers: TimeEventQueue,
    pub(crate) interfaces: HashMap<InterfaceId, Interface>,
    pub(crate) entries: HashMap<EntryId, Entry>,
    pub(crate) groups: HashMap<GroupId, EntryGroup>,
    pub(crate) announcements: HashMap<AnnouncementId, Announcement>,
    pub(crate) subscribers: Vec<mpsc::UnboundedSender<GroupEvent>>,
    pub(crate) fault: Option<TransportError>,
    next_id: u64,
    need_cleanup: bool,
}

impl<T: Transport> Responder<T> {
    /// Create a responder whose clock starts at `now`.
    pub fn new(config: EngineConfig, transport: T, now: Instant) -> Self {
        Self {
            config,
            transport,
            clock: now,
            timers: TimeEventQueue::new(),
            interfaces: HashMap::new(),
            entries: HashMap::new(),
            groups: HashMap::new(),
            announcements: HashMap::new(),
            subscribers: Vec::new(),
            fault: None,
            next_id: 0,
            need_cleanup: false,
        }
    }

    /// Like [`Responder::new`], rejecting unusable configurations.
    pub fn with_validated_config(
        config: EngineConfig,
        transport: T,
        now: Instant,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::new(config, transport, now))
    }

    pub(crate) fn next_raw_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ------------------------------------------------------------------
    // Clock and timers
    // ------------------------------------------------------------------

    /// The engine's notion of the current time.
    pub fn now(&self) -> Instant {
        self.clock
    }

    /// Move the clock forward without firing timers.
    ///
    /// Drivers call this before publishing operations so that newly
    /// scheduled steps are relative to the real current time. The clock
    /// never moves backwards.
    pub fn advance_clock(&mut self, now: Instant) {
        if now > self.clock {
            self.clock = now;
        }
    }

    /// When the driver should next call [`Responder::handle_timeout`].
    pub fn poll_timeout(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Number of timers still scheduled.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Fire every timer due at or before `now`, in order.
    ///
    /// Transmission failures are absorbed except fatal transport errors,
    /// which are returned after the affected groups were moved to `Failure`.
    pub fn handle_timeout(&mut self, now: Instant) -> CoreResult<()> {
        self.advance_clock(now);

        while let Some((_, target)) = self.timers.pop_due(self.clock) {
            trace!(?target, "timer elapsed");
            match target {
                TimerTarget::Announcement(id) => self.announcement_elapsed(id),
                TimerTarget::GroupRecompute(group) => self.group_recompute_elapsed(group),
            }
        }

        self.cleanup_dead();
        self.take_fault()
    }

    pub(crate) fn record_fault(&mut self, err: TransportError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    pub(crate) fn take_fault(&mut self) -> CoreResult<()> {
        match self.fault.take() {
            Some(err) => Err(CoreError::Transport(err)),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to group state changes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GroupEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: GroupEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Interfaces
    // ------------------------------------------------------------------

    /// Register an active interface and announce every eligible entry on it.
    ///
    /// Only schedules work: the first packets go out on the next
    /// [`Responder::handle_timeout`], so this cannot fail.
    pub fn add_interface(&mut self, spec: InterfaceSpec) -> InterfaceId {
        let id = InterfaceId::from_raw(self.next_raw_id());
        info!(interface = %spec, id = %id, "interface added");
        self.interfaces.insert(id, Interface::new(id, spec));
        self.populate_interface(id);
        id
    }

    /// Activate or deactivate an interface.
    ///
    /// Activation sweeps the interface. Deactivation sends goodbyes for
    /// everything registered on it and drops its announcements.
    pub fn set_interface_active(&mut self, id: InterfaceId, active: bool) -> CoreResult<()> {
        let iface = self
            .interfaces
            .get(&id)
            .ok_or_else(|| CoreError::UnknownInterface(id.to_string()))?;
        if iface.active == active {
            return Ok(());
        }
        debug!(interface = %iface.spec, active, "interface activity changed");

        if active {
            if let Some(iface) = self.interfaces.get_mut(&id) {
                iface.active = true;
            }
            self.sweep_interface(id);
        } else {
            self.withdraw_interface(id, true);
            if let Some(iface) = self.interfaces.get_mut(&id) {
                iface.active = false;
            }
        }
        self.cleanup_dead();
        self.take_fault()
    }

    /// Tear an interface down silently (it is already gone).
    pub fn remove_interface(&mut self, id: InterfaceId) -> CoreResult<()> {
        if !self.interfaces.contains_key(&id) {
            return Err(CoreError::UnknownInterface(id.to_string()));
        }
        self.withdraw_interface(id, false);
        if let Some(iface) = self.interfaces.remove(&id) {
            info!(interface = %iface.spec, "interface removed");
        }
        self.cleanup_dead();
        Ok(())
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(&id)
    }

    /// Handles of all registered interfaces, in creation order.
    pub fn interface_ids(&self) -> Vec<InterfaceId> {
        let mut ids: Vec<_> = self.interfaces.keys().copied().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Publish a record.
    ///
    /// With a group the record joins it and waits for the commit. Without
    /// one it is announced right away.
    pub fn add_record(
        &mut self,
        group: Option<GroupId>,
        scope: InterfaceScope,
        flags: PublishFlags,
        record: Record,
    ) -> CoreResult<EntryId> {
        record.validate()?;

        if let Some(group_id) = group {
            self.ensure_group_editable(group_id, "add records")?;
        }
        self.check_local_conflict(group, scope, flags, &record)?;

        let id = EntryId::from_raw(self.next_raw_id());
        debug!(
            entry = %id,
            key = %record.key,
            group = ?group,
            unique = flags.unique,
            "entry added"
        );
        self.entries
            .insert(id, Entry::new(id, record, scope, flags, group));

        match group {
            Some(group_id) => {
                if let Some(group) = self.groups.get_mut(&group_id) {
                    group.entries.push(id);
                }
            }
            None => self.announce_entry(id),
        }
        Ok(id)
    }

    /// Publish a host name: the address record plus its reverse PTR.
    ///
    /// Both records are unique regardless of `flags.unique`.
    pub fn add_address(
        &mut self,
        group: Option<GroupId>,
        scope: InterfaceScope,
        flags: PublishFlags,
        host: &str,
        addr: IpAddr,
    ) -> CoreResult<Vec<EntryId>> {
        let flags = PublishFlags {
            unique: true,
            ..flags
        };
        let forward = Record::address(host, addr, DEFAULT_TTL_HOST_NAME);
        let reverse = Record::ptr(reverse_lookup_name(&addr), host, DEFAULT_TTL_HOST_NAME);

        let forward_id = self.add_record(group, scope, flags, forward)?;
        match self.add_record(group, scope, flags, reverse) {
            Ok(reverse_id) => Ok(vec![forward_id, reverse_id]),
            Err(err) => {
                if let Err(rollback) = self.remove_entry(forward_id) {
                    warn!(entry = %forward_id, error = %rollback, "rollback of address record failed");
                }
                Err(err)
            }
        }
    }

    /// Withdraw a single entry with goodbyes and release it.
    ///
    /// Members of a committed group must be withdrawn through the group.
    pub fn remove_entry(&mut self, id: EntryId) -> CoreResult<()> {
        let entry = self
            .entries
            .get(&id)
            .filter(|entry| !entry.dead)
            .ok_or_else(|| CoreError::UnknownEntry(id.to_string()))?;
        if let Some(group_id) = entry.group {
            self.ensure_group_editable(group_id, "remove records")?;
        }

        self.withdraw_entry(id, true);
        self.mark_entry_dead(id);
        self.cleanup_dead();
        self.take_fault()
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id).filter(|entry| !entry.dead)
    }

    /// Live entries claiming the same fingerprint as `record`.
    pub fn entries_for(&self, record: &Record) -> Vec<EntryId> {
        let mut ids: Vec<_> = self
            .entries
            .values()
            .filter(|entry| !entry.dead && entry.record.key == record.key)
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        ids
    }

    /// Live entries in creation order.
    pub(crate) fn live_entry_ids(&self) -> Vec<EntryId> {
        let mut ids: Vec<_> = self
            .entries
            .values()
            .filter(|entry| !entry.dead)
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        ids
    }

    fn check_local_conflict(
        &self,
        group: Option<GroupId>,
        scope: InterfaceScope,
        flags: PublishFlags,
        record: &Record,
    ) -> CoreResult<()> {
        let conflict = self.entries.values().any(|other| {
            !other.dead
                && other.record.key == record.key
                && !other.record.same_claim(record)
                && (flags.unique || other.flags.unique)
                && other.scope.overlaps(&scope)
                && (group.is_none() || other.group != group)
        });
        if conflict {
            warn!(key = %record.key, "record collides with a local entry");
            return Err(CoreError::LocalCollision {
                name: record.key.name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn mark_entry_dead(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.dead = true;
            self.need_cleanup = true;
        }
    }

    pub(crate) fn mark_group_dead(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.dead = true;
            self.need_cleanup = true;
        }
    }

    /// Release entries and groups marked dead.
    ///
    /// Bulk operations only mark; releasing happens here, after the sweep
    /// that marked them has finished iterating.
    pub(crate) fn cleanup_dead(&mut self) {
        if !self.need_cleanup {
            return;
        }
        self.need_cleanup = false;

        let mut dead_entries: Vec<EntryId> = self
            .entries
            .values()
            .filter(|entry| entry.dead)
            .map(|entry| entry.id)
            .collect();
        dead_entries.sort();
        for id in dead_entries {
            // Any announcement still attached is torn down silently.
            if let Some(entry) = self.entries.get(&id) {
                for ann in entry.announcement_ids() {
                    self.remove_announcement(ann);
                }
            }
            if let Some(entry) = self.entries.remove(&id) {
                if let Some(group) = entry.group.and_then(|g| self.groups.get_mut(&g)) {
                    group.entries.retain(|member| *member != id);
                }
                trace!(entry = %id, "entry released");
            }
        }

        let dead_groups: Vec<GroupId> = self
            .groups
            .values()
            .filter(|group| group.dead)
            .map(|group| group.id)
            .collect();
        for id in dead_groups {
            if let Some(group) = self.groups.remove(&id) {
                if let Some(handle) = group.recompute {
                    self.timers.cancel(handle);
                }
                trace!(group = %id, "group released");
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn announcement(&self, id: AnnouncementId) -> Option<&Announcement> {
        self.announcements.get(&id)
    }

    /// All live announcements, in handle order.
    pub fn announcements(&self) -> impl Iterator<Item = &Announcement> {
        let mut anns: Vec<&Announcement> = self.announcements.values().collect();
        anns.sort_by_key(|ann| ann.id);
        anns.into_iter()
    }

    pub(crate) fn group_is_committed(&self, group: Option<GroupId>) -> bool {
        match group {
            None => true,
            Some(id) => self.groups.get(&id).is_some_and(|group| {
                !group.dead
                    && matches!(
                        group.state,
                        EntryGroupState::Registering | EntryGroupState::Established
                    )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eth, responder, v4};
    use crate::PublishFlags;

    #[test]
    fn test_views_follow_creation_order() {
        let mut r = responder();
        let ifaces: Vec<_> = (1..=8).map(|n| r.add_interface(eth(n))).collect();
        r.add_record(
            None,
            InterfaceScope::ANY,
            PublishFlags::unique(),
            Record::address("foo.local", v4(1), 120),
        )
        .unwrap();

        assert_eq!(r.interface_ids(), ifaces);
        let anns: Vec<_> = r.announcements().map(|ann| ann.id()).collect();
        let mut sorted = anns.clone();
        sorted.sort();
        assert_eq!(anns, sorted);
        assert_eq!(anns.len(), 8);
    }

    #[test]
    fn test_add_interface_returns_distinct_ids() {
        let mut r = responder();
        let a = r.add_interface(eth(1));
        let b = r.add_interface(eth(2));
        assert_ne!(a, b);
        assert_eq!(r.interface_ids(), vec![a, b]);
        assert!(r.interface(a).unwrap().is_active());
    }

    #[test]
    fn test_add_record_rejects_invalid_record() {
        let mut r = responder();
        let bad = Record::address("", v4(1), 120);
        let err = r
            .add_record(None, InterfaceScope::ANY, PublishFlags::unique(), bad)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_unique_record_collides_with_other_local_entry() {
        let mut r = responder();
        r.add_record(
            None,
            InterfaceScope::ANY,
            PublishFlags::unique(),
            Record::address("foo.local", v4(1), 120),
        )
        .unwrap();

        let err = r
            .add_record(
                None,
                InterfaceScope::ANY,
                PublishFlags::unique(),
                Record::address("FOO.local", v4(2), 120),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::LocalCollision { .. }));
    }

    #[test]
    fn test_unique_rrset_within_one_group_is_allowed() {
        let mut r = responder();
        let group = r.create_group();
        r.add_record(
            Some(group),
            InterfaceScope::ANY,
            PublishFlags::unique(),
            Record::address("foo.local", v4(1), 120),
        )
        .unwrap();
        assert!(r
            .add_record(
                Some(group),
                InterfaceScope::ANY,
                PublishFlags::unique(),
                Record::address("foo.local", v4(2), 120),
            )
            .is_ok());
    }

    #[test]
    fn test_shared_records_coexist() {
        let mut r = responder();
        let ptr = |target: &str| Record::ptr("_http._tcp.local", target, 4500);
        r.add_record(None, InterfaceScope::ANY, PublishFlags::shared(), ptr("a._http._tcp.local"))
            .unwrap();
        assert!(r
            .add_record(None, InterfaceScope::ANY, PublishFlags::shared(), ptr("b._http._tcp.local"))
            .is_ok());
    }

    #[test]
    fn test_disjoint_scopes_do_not_collide() {
        let mut r = responder();
        r.add_record(
            None,
            InterfaceScope::link(1),
            PublishFlags::unique(),
            Record::address("foo.local", v4(1), 120),
        )
        .unwrap();
        assert!(r
            .add_record(
                None,
                InterfaceScope::link(2),
                PublishFlags::unique(),
                Record::address("foo.local", v4(2), 120),
            )
            .is_ok());
    }

    #[test]
    fn test_add_address_adds_forward_and_reverse() {
        let mut r = responder();
        let group = r.create_group();
        let ids = r
            .add_address(Some(group), InterfaceScope::ANY, PublishFlags::shared(), "nas.local", v4(20))
            .unwrap();
        assert_eq!(ids.len(), 2);

        let reverse = r.entry(ids[1]).unwrap();
        assert_eq!(reverse.key().name, "20.0.0.10.in-addr.arpa");
        assert!(reverse.flags().unique);
        assert_eq!(r.group(group).unwrap().entries(), ids.as_slice());
    }

    #[test]
    fn test_add_address_rolls_back_on_reverse_collision() {
        let mut r = responder();
        r.add_record(
            None,
            InterfaceScope::ANY,
            PublishFlags::unique(),
            Record::ptr("20.0.0.10.in-addr.arpa", "other.local", 120),
        )
        .unwrap();

        let err = r
            .add_address(None, InterfaceScope::ANY, PublishFlags::unique(), "nas.local", v4(20))
            .unwrap_err();
        assert!(matches!(err, CoreError::LocalCollision { .. }));
        assert!(r
            .entries_for(&Record::address("nas.local", v4(20), 120))
            .is_empty());
    }

    #[test]
    fn test_remove_unknown_entry_fails() {
        let mut r = responder();
        assert!(matches!(
            r.remove_entry(EntryId::from_raw(77)),
            Err(CoreError::UnknownEntry(_))
        ));
    }

    #[test]
    fn test_clock_never_moves_backwards() {
        let mut r = responder();
        let start = r.now();
        r.advance_clock(start + std::time::Duration::from_secs(1));
        r.advance_clock(start);
        assert_eq!(r.now(), start + std::time::Duration::from_secs(1));
    }
}
