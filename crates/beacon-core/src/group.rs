//! Entry groups: records committed and withdrawn as one unit.
//!
//! A group's state is a reduction over the states of its members'
//! announcements. The engine recomputes it either synchronously
//! ([`Responder::check_probed_now`]) or on the next timer tick
//! ([`Responder::schedule_group_recompute`]); state transitions announce
//! themselves to subscribers as [`GroupEvent`]s.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::announce::AnnouncementState;
use crate::entry::EntryId;
use crate::error::{CoreError, CoreResult};
use crate::handle::define_handle;
use crate::responder::Responder;
use crate::timeq::{TimerHandle, TimerTarget};
use crate::transport::Transport;

define_handle!(
    /// Handle to an entry group.
    GroupId,
    "grp"
);

/// Aggregate state of an entry group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryGroupState {
    /// Not committed; members may be edited.
    Uncommitted,
    /// Committed, at least one announcement not yet established.
    Registering,
    /// Every announcement of every member is established.
    Established,
    /// A member lost a conflict; all members were withdrawn.
    Collision,
    /// A fatal transport error hit a member; all members were withdrawn.
    Failure,
}

impl EntryGroupState {
    /// Whether members may be added or removed in this state.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            EntryGroupState::Uncommitted | EntryGroupState::Collision | EntryGroupState::Failure
        )
    }
}

/// Emitted whenever a group changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEvent {
    pub group: GroupId,
    pub state: EntryGroupState,
}

/// An atomically committed set of entries.
#[derive(Debug)]
pub struct EntryGroup {
    pub(crate) id: GroupId,
    pub(crate) state: EntryGroupState,
    pub(crate) entries: Vec<EntryId>,
    pub(crate) last_error: Option<String>,
    pub(crate) recompute: Option<TimerHandle>,
    pub(crate) dead: bool,
}

impl EntryGroup {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            state: EntryGroupState::Uncommitted,
            entries: Vec::new(),
            last_error: None,
            recompute: None,
            dead: false,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn state(&self) -> EntryGroupState {
        self.state
    }

    /// Members in insertion order.
    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The error that moved the group to `Failure`, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl<T: Transport> Responder<T> {
    /// Create an empty, uncommitted group.
    pub fn create_group(&mut self) -> GroupId {
        let id = GroupId::from_raw(self.next_raw_id());
        debug!(group = %id, "group created");
        self.groups.insert(id, EntryGroup::new(id));
        id
    }

    pub fn group(&self, id: GroupId) -> Option<&EntryGroup> {
        self.groups.get(&id).filter(|group| !group.dead)
    }

    pub fn group_state(&self, id: GroupId) -> Option<EntryGroupState> {
        self.group(id).map(|group| group.state)
    }

    pub(crate) fn ensure_group_editable(
        &self,
        id: GroupId,
        operation: &'static str,
    ) -> CoreResult<()> {
        let group = self
            .group(id)
            .ok_or_else(|| CoreError::UnknownGroup(id.to_string()))?;
        if !group.state.is_editable() {
            return Err(CoreError::BadState {
                group: id,
                state: group.state,
                operation,
            });
        }
        Ok(())
    }

    /// Commit a group: announce every member on every eligible interface.
    ///
    /// Allowed from `Uncommitted`, and from `Collision` or `Failure` to
    /// retry. The aggregate state is recomputed on the next tick, so a group
    /// without eligible interfaces becomes established right away.
    pub fn commit_group(&mut self, id: GroupId) -> CoreResult<()> {
        let group = self
            .groups
            .get_mut(&id)
            .filter(|group| !group.dead)
            .ok_or_else(|| CoreError::UnknownGroup(id.to_string()))?;
        if !group.state.is_editable() {
            return Err(CoreError::BadState {
                group: id,
                state: group.state,
                operation: "commit",
            });
        }
        group.last_error = None;
        info!(group = %id, members = group.entries.len(), "committing group");

        self.change_group_state(id, EntryGroupState::Registering);
        self.announce_group(id);
        self.schedule_group_recompute(id);
        Ok(())
    }

    /// Withdraw every member with goodbyes and return to `Uncommitted`.
    ///
    /// Members are released; the caller adds records again before
    /// recommitting.
    pub fn reset_group(&mut self, id: GroupId) -> CoreResult<()> {
        let members = self
            .group(id)
            .map(|group| group.entries.clone())
            .ok_or_else(|| CoreError::UnknownGroup(id.to_string()))?;
        debug!(group = %id, members = members.len(), "resetting group");

        for entry in members {
            self.withdraw_entry(entry, true);
            self.mark_entry_dead(entry);
        }
        self.change_group_state(id, EntryGroupState::Uncommitted);
        self.cleanup_dead();
        self.take_fault()
    }

    /// Withdraw every member with goodbyes and release the group.
    pub fn free_group(&mut self, id: GroupId) -> CoreResult<()> {
        let members = self
            .group(id)
            .map(|group| group.entries.clone())
            .ok_or_else(|| CoreError::UnknownGroup(id.to_string()))?;
        debug!(group = %id, "freeing group");

        for entry in members {
            self.withdraw_entry(entry, true);
            self.mark_entry_dead(entry);
        }
        self.cancel_group_recompute(id);
        self.mark_group_dead(id);
        self.cleanup_dead();
        self.take_fault()
    }

    /// Recompute the group's state now and return it.
    pub fn check_probed_now(&mut self, id: GroupId) -> Option<EntryGroupState> {
        self.cancel_group_recompute(id);
        self.recompute_group(id);
        self.group_state(id)
    }

    /// Ask for the group's state to be recomputed on the next tick.
    ///
    /// Requests coalesce: at most one recomputation is pending per group.
    pub fn schedule_group_recompute(&mut self, id: GroupId) {
        let deadline = self.clock;
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        if group.dead
            || group.recompute.is_some()
            || !matches!(
                group.state,
                EntryGroupState::Registering | EntryGroupState::Established
            )
        {
            return;
        }
        group.recompute = Some(
            self.timers
                .schedule(deadline, TimerTarget::GroupRecompute(id)),
        );
    }

    pub(crate) fn group_recompute_elapsed(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.recompute = None;
        }
        self.recompute_group(id);
    }

    fn cancel_group_recompute(&mut self, id: GroupId) {
        if let Some(handle) = self
            .groups
            .get_mut(&id)
            .and_then(|group| group.recompute.take())
        {
            self.timers.cancel(handle);
        }
    }

    /// The reduction: established iff every member announcement is.
    fn recompute_group(&mut self, id: GroupId) {
        let Some(group) = self.group(id) else {
            return;
        };
        if !matches!(
            group.state,
            EntryGroupState::Registering | EntryGroupState::Established
        ) {
            return;
        }

        self.release_waiting(id);

        let all_established = self
            .member_announcement_states(id)
            .into_iter()
            .all(|state| state == AnnouncementState::Established);
        let target = if all_established {
            EntryGroupState::Established
        } else {
            EntryGroupState::Registering
        };
        self.change_group_state(id, target);
    }

    /// States of every announcement of every live member.
    pub(crate) fn member_announcement_states(&self, id: GroupId) -> Vec<AnnouncementState> {
        let Some(group) = self.group(id) else {
            return Vec::new();
        };
        group
            .entries
            .iter()
            .filter_map(|entry| self.entries.get(entry))
            .filter(|entry| !entry.dead)
            .flat_map(|entry| entry.announcements.iter())
            .filter_map(|ann| self.announcements.get(ann))
            .map(|ann| ann.state)
            .collect()
    }

    /// A member lost a conflict: withdraw every member silently.
    pub(crate) fn collide_group(&mut self, id: GroupId) {
        let Some(members) = self.group(id).map(|group| group.entries.clone()) else {
            return;
        };
        warn!(group = %id, members = members.len(), "group collision, withdrawing all members");
        for entry in members {
            self.withdraw_entry(entry, false);
        }
        self.change_group_state(id, EntryGroupState::Collision);
    }

    /// A fatal transport error hit a member: withdraw every member silently.
    pub(crate) fn fail_group(&mut self, id: GroupId, error: String) {
        let Some(members) = self.group(id).map(|group| group.entries.clone()) else {
            return;
        };
        for entry in members {
            self.withdraw_entry(entry, false);
        }
        if let Some(group) = self.groups.get_mut(&id) {
            group.last_error = Some(error);
        }
        self.change_group_state(id, EntryGroupState::Failure);
    }

    pub(crate) fn change_group_state(&mut self, id: GroupId, state: EntryGroupState) {
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        if group.state == state {
            return;
        }
        let previous = group.state;
        group.state = state;

        if !matches!(
            state,
            EntryGroupState::Registering | EntryGroupState::Established
        ) {
            if let Some(handle) = group.recompute.take() {
                self.timers.cancel(handle);
            }
        }

        match state {
            EntryGroupState::Established => info!(group = %id, "group established"),
            EntryGroupState::Collision => warn!(group = %id, "group in collision"),
            EntryGroupState::Failure => warn!(
                group = %id,
                error = group.last_error.as_deref().unwrap_or("unknown"),
                "group failed"
            ),
            _ => debug!(group = %id, ?previous, ?state, "group state changed"),
        }

        self.emit(GroupEvent { group: id, state });
    }
}
