//! Entries: one record plus how it should be published.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::announce::AnnouncementId;
use crate::group::GroupId;
use crate::handle::define_handle;
use crate::iface::InterfaceScope;
use crate::record::{Record, RecordKey};

define_handle!(
    /// Handle to a published entry.
    EntryId,
    "ent"
);

/// How a record is claimed on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishFlags {
    /// The name belongs to this host alone and must be probed for.
    pub unique: bool,
    /// Skip probing even though the record is unique (well-known data).
    pub no_probe: bool,
    /// Never transmit unsolicited announcements.
    pub no_announce: bool,
}

impl PublishFlags {
    /// A shared record, e.g. a PTR in a browse domain.
    pub fn shared() -> Self {
        Self::default()
    }

    /// A unique record, e.g. a host name.
    pub fn unique() -> Self {
        Self {
            unique: true,
            ..Self::default()
        }
    }

    pub fn with_no_probe(mut self) -> Self {
        self.no_probe = true;
        self
    }

    pub fn with_no_announce(mut self) -> Self {
        self.no_announce = true;
        self
    }

    /// Whether announcements for this entry start by probing.
    pub fn needs_probing(&self) -> bool {
        self.unique && !self.no_probe
    }
}

/// A record registered with the responder.
#[derive(Debug)]
pub struct Entry {
    pub(crate) id: EntryId,
    pub(crate) record: Record,
    pub(crate) scope: InterfaceScope,
    pub(crate) flags: PublishFlags,
    pub(crate) group: Option<GroupId>,
    pub(crate) dead: bool,
    pub(crate) announcements: HashSet<AnnouncementId>,
}

impl Entry {
    pub(crate) fn new(
        id: EntryId,
        record: Record,
        scope: InterfaceScope,
        flags: PublishFlags,
        group: Option<GroupId>,
    ) -> Self {
        Self {
            id,
            record,
            scope,
            flags,
            group,
            dead: false,
            announcements: HashSet::new(),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    /// The fingerprint this entry claims.
    pub fn key(&self) -> &RecordKey {
        &self.record.key
    }

    pub fn scope(&self) -> InterfaceScope {
        self.scope
    }

    pub fn flags(&self) -> PublishFlags {
        self.flags
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    /// Whether the entry has been withdrawn and awaits release.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn announcement_count(&self) -> usize {
        self.announcements.len()
    }

    /// Announcements of this entry, in handle order.
    pub(crate) fn announcement_ids(&self) -> Vec<AnnouncementId> {
        let mut ids: Vec<_> = self.announcements.iter().copied().collect();
        ids.sort();
        ids
    }
}
