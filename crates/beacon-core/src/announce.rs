//! Per (entry, interface) announcement state machine.
//!
//! ```text
//!   Probing ──(probe_count probes)──> Waiting ──(grace)──> Announcing ──(announce_count)──> Established
//!      ^                                                                                      │
//!      └──────────────────────────── return_to_initial_state ─────────────────────────────────┘
//! ```
//!
//! Entries that need no probing start in `Announcing` (or in `Waiting` while
//! their group is registering, so a group's records go out together);
//! entries that must not be announced go straight to `Established`. Established announcements do
//! not schedule themselves; refreshing them is the interface sweep's job.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::entry::EntryId;
use crate::error::CoreResult;
use crate::group::{EntryGroupState, GroupId};
use crate::handle::define_handle;
use crate::iface::InterfaceId;
use crate::responder::Responder;
use crate::timeq::{TimerHandle, TimerTarget};
use crate::transport::{PacketKind, Transport, TransportError};

define_handle!(
    /// Handle to an announcement.
    AnnouncementId,
    "ann"
);

/// Where an announcement is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementState {
    Probing,
    Waiting,
    Announcing,
    Established,
}

/// The announcement of one entry on one interface.
#[derive(Debug)]
pub struct Announcement {
    pub(crate) id: AnnouncementId,
    pub(crate) interface: InterfaceId,
    pub(crate) entry: EntryId,
    pub(crate) timer: Option<TimerHandle>,
    pub(crate) state: AnnouncementState,
    pub(crate) iteration: u32,
    pub(crate) delay: Duration,
    pub(crate) last_sent: Option<Instant>,
}

impl Announcement {
    pub fn id(&self) -> AnnouncementId {
        self.id
    }

    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    pub fn entry(&self) -> EntryId {
        self.entry
    }

    pub fn state(&self) -> AnnouncementState {
        self.state
    }

    /// Probes or announcements sent in the current state.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Current announcement spacing.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// When the authoritative record was last transmitted.
    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Whether a step is scheduled.
    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }
}

impl<T: Transport> Responder<T> {
    /// Create the announcement for `entry` on `interface` if it is eligible
    /// and does not exist yet.
    pub(crate) fn new_announcement(
        &mut self,
        entry_id: EntryId,
        interface_id: InterfaceId,
    ) -> Option<AnnouncementId> {
        let iface = self.interfaces.get(&interface_id).filter(|i| i.active)?;
        let entry = self.entries.get(&entry_id).filter(|e| !e.dead)?;
        if !entry.scope.matches(&iface.spec) || !self.group_is_committed(entry.group) {
            return None;
        }
        let duplicate = entry.announcements.iter().any(|ann| {
            self.announcements
                .get(ann)
                .is_some_and(|ann| ann.interface == interface_id)
        });
        if duplicate {
            return None;
        }

        let id = AnnouncementId::from_raw(self.next_raw_id());
        trace!(announcement = %id, entry = %entry_id, interface = %interface_id, "announcement created");
        self.announcements.insert(
            id,
            Announcement {
                id,
                interface: interface_id,
                entry: entry_id,
                timer: None,
                state: AnnouncementState::Probing,
                iteration: 0,
                delay: Duration::ZERO,
                last_sent: None,
            },
        );
        if let Some(iface) = self.interfaces.get_mut(&interface_id) {
            iface.announcements.insert(id);
        }
        if let Some(entry) = self.entries.get_mut(&entry_id) {
            entry.announcements.insert(id);
        }

        self.go_to_initial_state(id);
        Some(id)
    }

    /// Restart the announcement from the state its flags dictate.
    pub(crate) fn go_to_initial_state(&mut self, id: AnnouncementId) {
        let Some(entry_id) = self.announcements.get(&id).map(|ann| ann.entry) else {
            return;
        };
        let Some((flags, group)) = self.entries.get(&entry_id).map(|e| (e.flags, e.group)) else {
            return;
        };

        let registering =
            group.is_some_and(|g| self.group_state(g) == Some(EntryGroupState::Registering));
        let state = if flags.needs_probing() {
            AnnouncementState::Probing
        } else if flags.no_announce {
            AnnouncementState::Established
        } else if registering {
            // Held back until the group's unique members finish probing.
            AnnouncementState::Waiting
        } else {
            AnnouncementState::Announcing
        };

        if let Some(ann) = self.announcements.get_mut(&id) {
            ann.state = state;
            ann.iteration = 0;
            ann.delay = Duration::ZERO;
        }
        debug!(announcement = %id, entry = %entry_id, ?state, "announcement reset to initial state");

        match state {
            AnnouncementState::Probing | AnnouncementState::Announcing => {
                self.set_timer(id, Some(Duration::ZERO))
            }
            AnnouncementState::Waiting | AnnouncementState::Established => {
                self.set_timer(id, None)
            }
        }
        if let Some(group) = group {
            self.schedule_group_recompute(group);
        }
    }

    /// Replace the pending step. `None` leaves the announcement unscheduled.
    fn set_timer(&mut self, id: AnnouncementId, after: Option<Duration>) {
        let deadline = after.map(|after| self.clock + after);
        let Some(ann) = self.announcements.get_mut(&id) else {
            return;
        };
        if let Some(handle) = ann.timer.take() {
            self.timers.cancel(handle);
        }
        ann.timer = deadline.map(|at| self.timers.schedule(at, TimerTarget::Announcement(id)));
    }

    pub(crate) fn announcement_elapsed(&mut self, id: AnnouncementId) {
        let Some(ann) = self.announcements.get_mut(&id) else {
            return;
        };
        ann.timer = None;
        let state = ann.state;
        match state {
            AnnouncementState::Probing => self.probe_step(id),
            AnnouncementState::Waiting => self.waiting_elapsed(id),
            AnnouncementState::Announcing => self.announce_step(id),
            AnnouncementState::Established => {}
        }
    }

    fn probe_step(&mut self, id: AnnouncementId) {
        if let Err(err) = self.transmit(id, PacketKind::Probe) {
            self.transport_failed(id, err);
            return;
        }

        let probe_count = self.config.probe_count;
        let Some(ann) = self.announcements.get_mut(&id) else {
            return;
        };
        ann.iteration += 1;

        if ann.iteration >= probe_count {
            ann.state = AnnouncementState::Waiting;
            debug!(announcement = %id, "probing finished, waiting for late conflicts");
            self.set_timer(id, Some(self.config.waiting_grace()));
        } else {
            self.set_timer(id, Some(self.config.probe_interval()));
        }
    }

    fn waiting_elapsed(&mut self, id: AnnouncementId) {
        let Some(entry_id) = self.announcements.get(&id).map(|ann| ann.entry) else {
            return;
        };
        match self.entries.get(&entry_id).and_then(|entry| entry.group) {
            // Group members start announcing together, once nobody in the
            // group is still probing.
            Some(group) => self.release_waiting(group),
            None => self.start_announcing(id),
        }
    }

    /// Move every grouped announcement whose grace has elapsed to
    /// `Announcing`, unless a member of the group is still probing.
    pub(crate) fn release_waiting(&mut self, group: GroupId) {
        let Some(members) = self.group(group).map(|g| g.entries.clone()) else {
            return;
        };
        let anns: Vec<AnnouncementId> = members
            .iter()
            .filter_map(|entry| self.entries.get(entry))
            .flat_map(|entry| entry.announcement_ids())
            .collect();

        let still_probing = anns.iter().any(|ann| {
            self.announcements
                .get(ann)
                .is_some_and(|ann| ann.state == AnnouncementState::Probing)
        });
        if still_probing {
            return;
        }

        for id in anns {
            let ready = self.announcements.get(&id).is_some_and(|ann| {
                ann.state == AnnouncementState::Waiting && ann.timer.is_none()
            });
            if ready {
                self.start_announcing(id);
            }
        }
    }

    fn start_announcing(&mut self, id: AnnouncementId) {
        let Some(entry_id) = self.announcements.get(&id).map(|ann| ann.entry) else {
            return;
        };
        let no_announce = self
            .entries
            .get(&entry_id)
            .is_some_and(|entry| entry.flags.no_announce);

        if no_announce {
            self.set_established(id);
            return;
        }
        if let Some(ann) = self.announcements.get_mut(&id) {
            ann.state = AnnouncementState::Announcing;
            ann.iteration = 0;
            ann.delay = Duration::ZERO;
        }
        debug!(announcement = %id, entry = %entry_id, "announcing");
        self.set_timer(id, Some(Duration::ZERO));
    }

    fn announce_step(&mut self, id: AnnouncementId) {
        if let Err(err) = self.transmit(id, PacketKind::Response) {
            self.transport_failed(id, err);
            return;
        }

        let announce_count = self.config.announce_count;
        let initial = self.config.announce_initial_delay();
        let max = self.config.announce_max_delay();
        let Some(ann) = self.announcements.get_mut(&id) else {
            return;
        };
        ann.iteration += 1;

        if ann.iteration >= announce_count {
            self.set_established(id);
            return;
        }

        ann.delay = if ann.delay.is_zero() {
            initial
        } else {
            (ann.delay * 2).min(max)
        };
        let delay = ann.delay;
        self.set_timer(id, Some(delay));
    }

    fn set_established(&mut self, id: AnnouncementId) {
        let Some(ann) = self.announcements.get_mut(&id) else {
            return;
        };
        ann.state = AnnouncementState::Established;
        let entry_id = ann.entry;
        self.set_timer(id, None);
        debug!(announcement = %id, entry = %entry_id, "announcement established");

        if let Some(group) = self.entries.get(&entry_id).and_then(|entry| entry.group) {
            self.schedule_group_recompute(group);
        }
    }

    /// Hand one packet for the announcement to the transport.
    ///
    /// Transient failures are logged and swallowed; the next scheduled step
    /// is the retry. Fatal failures are returned.
    pub(crate) fn transmit(
        &mut self,
        id: AnnouncementId,
        kind: PacketKind,
    ) -> Result<(), TransportError> {
        let Some(ann) = self.announcements.get(&id) else {
            return Ok(());
        };
        let (Some(iface), Some(entry)) = (
            self.interfaces.get(&ann.interface),
            self.entries.get(&ann.entry),
        ) else {
            return Ok(());
        };

        let goodbye;
        let record = match kind {
            PacketKind::Goodbye => {
                goodbye = entry.record.goodbye();
                &goodbye
            }
            PacketKind::Probe | PacketKind::Response => &entry.record,
        };
        debug!(
            announcement = %id,
            interface = %iface.spec,
            key = %record.key,
            ttl = record.ttl,
            ?kind,
            "sending"
        );

        match self.transport.send(&iface.spec, record, record.ttl, kind) {
            Ok(()) => {
                if kind == PacketKind::Response {
                    let now = self.clock;
                    if let Some(ann) = self.announcements.get_mut(&id) {
                        ann.last_sent = Some(now);
                    }
                }
                Ok(())
            }
            Err(TransportError::Transient(reason)) => {
                warn!(announcement = %id, ?kind, %reason, "send failed, retrying on next step");
                Ok(())
            }
            Err(err) => {
                error!(announcement = %id, ?kind, error = %err, "transport failed");
                Err(err)
            }
        }
    }

    /// A fatal send error hit this announcement.
    pub(crate) fn transport_failed(&mut self, id: AnnouncementId, err: TransportError) {
        let Some(entry_id) = self.announcements.get(&id).map(|ann| ann.entry) else {
            return;
        };
        match self.entries.get(&entry_id).and_then(|entry| entry.group) {
            Some(group) => self.fail_group(group, err.to_string()),
            None => {
                self.withdraw_entry(entry_id, false);
                self.mark_entry_dead(entry_id);
            }
        }
        self.record_fault(err);
    }

    /// Withdraw the announcement, sending a goodbye if `send` is set and
    /// the record was ever claimed. A second call is a no-op.
    pub fn goodbye_announcement(&mut self, id: AnnouncementId, send: bool) -> CoreResult<()> {
        self.withdraw_announcement(id, send);
        self.take_fault()
    }

    pub(crate) fn withdraw_announcement(&mut self, id: AnnouncementId, send: bool) {
        let Some(ann) = self.announcements.get(&id) else {
            return;
        };
        let claimed = matches!(
            ann.state,
            AnnouncementState::Announcing | AnnouncementState::Established
        );
        let announces = self
            .entries
            .get(&ann.entry)
            .is_some_and(|entry| !entry.flags.no_announce);
        let iface_up = self
            .interfaces
            .get(&ann.interface)
            .is_some_and(|iface| iface.active);

        if send && claimed && announces && iface_up {
            if let Err(err) = self.transmit(id, PacketKind::Goodbye) {
                self.record_fault(err);
            }
        }
        self.remove_announcement(id);
    }

    /// Unlink and drop the announcement, cancelling its timer.
    pub(crate) fn remove_announcement(&mut self, id: AnnouncementId) {
        let Some(ann) = self.announcements.remove(&id) else {
            return;
        };
        if let Some(handle) = ann.timer {
            self.timers.cancel(handle);
        }
        if let Some(iface) = self.interfaces.get_mut(&ann.interface) {
            iface.announcements.remove(&id);
        }
        let group = match self.entries.get_mut(&ann.entry) {
            Some(entry) => {
                entry.announcements.remove(&id);
                entry.group
            }
            None => None,
        };
        trace!(announcement = %id, "announcement removed");

        if let Some(group) = group {
            self.schedule_group_recompute(group);
        }
    }
}
