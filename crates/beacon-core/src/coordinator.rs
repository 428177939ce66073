//! Sweep operations tying entries, interfaces and groups to announcements.

use tracing::{debug, trace, warn};

use crate::announce::{Announcement, AnnouncementId, AnnouncementState};
use crate::entry::EntryId;
use crate::error::CoreResult;
use crate::group::GroupId;
use crate::iface::InterfaceId;
use crate::record::Record;
use crate::responder::Responder;
use crate::transport::{PacketKind, Transport};

impl<T: Transport> Responder<T> {
    /// Create missing announcements for every eligible entry on the
    /// interface and refresh established records whose TTL is running out.
    ///
    /// A fatal error while refreshing is returned here, after the affected
    /// group was moved to `Failure`.
    pub fn announce_interface(&mut self, interface: InterfaceId) -> CoreResult<()> {
        self.sweep_interface(interface);
        self.cleanup_dead();
        self.take_fault()
    }

    pub(crate) fn sweep_interface(&mut self, interface: InterfaceId) {
        if !self
            .interfaces
            .get(&interface)
            .is_some_and(|iface| iface.active)
        {
            return;
        }

        for entry in self.live_entry_ids() {
            match self.get_announcement(entry, interface) {
                Some(ann) => self.refresh_if_due(ann),
                None => {
                    self.new_announcement(entry, interface);
                }
            }
        }
    }

    /// Create missing announcements on the interface. Never transmits.
    pub(crate) fn populate_interface(&mut self, interface: InterfaceId) {
        for entry in self.live_entry_ids() {
            self.new_announcement(entry, interface);
        }
    }

    /// Run the interface sweep over every active interface.
    pub fn announce_all_interfaces(&mut self) -> CoreResult<()> {
        trace!("sweeping all interfaces");
        for interface in self.interface_ids() {
            self.sweep_interface(interface);
        }
        self.cleanup_dead();
        self.take_fault()
    }

    /// Create announcements for one entry on every known interface.
    pub fn announce_entry(&mut self, entry: EntryId) {
        for interface in self.interface_ids() {
            self.new_announcement(entry, interface);
        }
    }

    /// Announce every member of a group.
    pub fn announce_group(&mut self, group: GroupId) {
        let Some(members) = self.group(group).map(|g| g.entries.clone()) else {
            return;
        };
        for entry in members {
            self.announce_entry(entry);
        }
    }

    fn refresh_if_due(&mut self, id: AnnouncementId) {
        let Some(ann) = self.announcements.get(&id) else {
            return;
        };
        if ann.state != AnnouncementState::Established {
            return;
        }
        let Some(entry) = self.entries.get(&ann.entry) else {
            return;
        };
        if entry.flags.no_announce {
            return;
        }
        let due = match ann.last_sent {
            Some(sent) => {
                self.clock.saturating_duration_since(sent)
                    >= self.config.refresh_after(entry.record.ttl)
            }
            None => false,
        };
        if !due {
            return;
        }

        debug!(announcement = %id, "refreshing record before TTL expiry");
        if let Err(err) = self.transmit(id, PacketKind::Response) {
            self.transport_failed(id, err);
        }
    }

    /// Withdraw every announcement on the interface.
    ///
    /// A fatal error while sending goodbyes is returned; the withdrawal
    /// still completes.
    pub fn goodbye_interface(&mut self, interface: InterfaceId, send: bool) -> CoreResult<()> {
        self.withdraw_interface(interface, send);
        self.take_fault()
    }

    pub(crate) fn withdraw_interface(&mut self, interface: InterfaceId, send: bool) {
        let Some(anns) = self
            .interfaces
            .get(&interface)
            .map(|iface| iface.announcement_ids())
        else {
            return;
        };
        debug!(interface = %interface, count = anns.len(), send, "withdrawing interface");
        for ann in anns {
            self.withdraw_announcement(ann, send);
        }
    }

    /// Withdraw every announcement of the entry. The entry stays registered.
    pub fn goodbye_entry(&mut self, entry: EntryId, send: bool) -> CoreResult<()> {
        self.withdraw_entry(entry, send);
        self.take_fault()
    }

    pub(crate) fn withdraw_entry(&mut self, entry: EntryId, send: bool) {
        let Some(anns) = self.entries.get(&entry).map(|e| e.announcement_ids()) else {
            return;
        };
        for ann in anns {
            self.withdraw_announcement(ann, send);
        }
    }

    /// Withdraw every announcement of every entry.
    pub fn goodbye_all(&mut self, send: bool) -> CoreResult<()> {
        debug!(send, "withdrawing all entries");
        for entry in self.live_entry_ids() {
            self.withdraw_entry(entry, send);
        }
        self.cleanup_dead();
        self.take_fault()
    }

    /// Restart the entry's announcement on the interface from scratch.
    ///
    /// Used after the record changed. An established group drops back to
    /// `Registering` until the announcement settles again.
    pub fn return_to_initial_state(&mut self, entry: EntryId, interface: InterfaceId) {
        if let Some(ann) = self.get_announcement(entry, interface) {
            self.go_to_initial_state(ann);
        }
    }

    /// Whether peers can currently see the entry on the interface.
    pub fn entry_is_registered(&self, entry: EntryId, interface: InterfaceId) -> bool {
        let Some(unique) = self.entry(entry).map(|e| e.flags.unique) else {
            return false;
        };
        self.find_announcement(entry, interface)
            .is_some_and(|ann| match ann.state {
                AnnouncementState::Announcing | AnnouncementState::Established => true,
                AnnouncementState::Waiting => !unique,
                AnnouncementState::Probing => false,
            })
    }

    /// Whether the entry's name is still being claimed on the interface.
    pub fn entry_is_probing(&self, entry: EntryId, interface: InterfaceId) -> bool {
        let Some(unique) = self.entry(entry).map(|e| e.flags.unique) else {
            return false;
        };
        self.find_announcement(entry, interface)
            .is_some_and(|ann| match ann.state {
                AnnouncementState::Probing => true,
                AnnouncementState::Waiting => unique,
                AnnouncementState::Announcing | AnnouncementState::Established => false,
            })
    }

    /// The entry's announcement on the interface.
    pub fn find_announcement(&self, entry: EntryId, interface: InterfaceId) -> Option<&Announcement> {
        self.get_announcement(entry, interface)
            .and_then(|id| self.announcements.get(&id))
    }

    pub(crate) fn get_announcement(
        &self,
        entry: EntryId,
        interface: InterfaceId,
    ) -> Option<AnnouncementId> {
        let entry = self.entries.get(&entry)?;
        entry.announcements.iter().copied().find(|ann| {
            self.announcements
                .get(ann)
                .is_some_and(|ann| ann.interface == interface)
        })
    }

    /// A peer holds a conflicting claim to the entry's name on the interface.
    ///
    /// Every announcement of the entry is cancelled silently. A grouped entry
    /// takes its whole group to `Collision`; an ungrouped one is released.
    /// Nothing is retried: renaming is up to the caller.
    pub fn notify_conflict(&mut self, entry: EntryId, interface: InterfaceId) {
        let Some(e) = self.entry(entry) else {
            return;
        };
        if !e.flags.unique || self.get_announcement(entry, interface).is_none() {
            return;
        }
        let group = e.group;
        warn!(entry = %entry, key = %e.record.key, interface = %interface, "name conflict");

        match group {
            Some(group) => self.collide_group(group),
            None => {
                self.withdraw_entry(entry, false);
                self.mark_entry_dead(entry);
                self.cleanup_dead();
            }
        }
    }

    /// A peer is probing for a name we are probing for too.
    ///
    /// The lexicographically later record wins. Identical data is our own
    /// probe echoed back and is ignored.
    pub fn handle_incoming_probe(&mut self, interface: InterfaceId, record: &Record) {
        if !self.interfaces.contains_key(&interface) {
            return;
        }
        let mut contenders: Vec<EntryId> = self
            .entries
            .values()
            .filter(|entry| !entry.dead && entry.flags.unique && entry.record.key == record.key)
            .map(|entry| entry.id)
            .collect();
        contenders.sort();

        for entry in contenders {
            if !self.entry_is_probing(entry, interface) {
                continue;
            }
            let Some(ours) = self.entry(entry).map(|e| e.record.clone()) else {
                continue;
            };
            match record.lexicographical_cmp(&ours) {
                std::cmp::Ordering::Greater => {
                    debug!(entry = %entry, "lost simultaneous probe");
                    self.notify_conflict(entry, interface);
                }
                std::cmp::Ordering::Less => {
                    trace!(entry = %entry, "won simultaneous probe");
                }
                std::cmp::Ordering::Equal => {}
            }
        }
    }
}
