//! Record announcement and conflict-probing engine for beacon.
//!
//! This crate implements the part of a multicast-DNS responder that decides
//! whether a name may be claimed on the local link:
//!
//! - **Announcements**: one state machine per (entry, interface) pair that
//!   probes for a name, waits out late conflicts, announces the record with
//!   exponential spacing and finally settles as established.
//! - **Entry groups**: sets of records committed and withdrawn atomically;
//!   a conflict on any member collapses the whole group to `Collision`.
//! - **Coordinator sweeps**: per-interface, per-entry and global operations
//!   that create, refresh and withdraw announcements.
//!
//! The engine is sans-I/O. Packets leave through the [`Transport`] trait and
//! time only moves when the driver calls [`Responder::handle_timeout`]. The
//! driver asks [`Responder::poll_timeout`] when to call next.
//!
//! # Example
//!
//! ```ignore
//! use beacon_core::{EngineConfig, InterfaceScope, InterfaceSpec, Protocol, PublishFlags, Record, Responder};
//! use std::time::Instant;
//!
//! let mut responder = Responder::new(EngineConfig::default(), transport, Instant::now());
//! responder.add_interface(InterfaceSpec::new(2, "eth0", Protocol::Inet));
//!
//! let group = responder.create_group();
//! responder.add_address(Some(group), InterfaceScope::ANY, PublishFlags::unique(), "printer.local", addr)?;
//! responder.commit_group(group)?;
//!
//! while let Some(deadline) = responder.poll_timeout() {
//!     wait_until(deadline);
//!     responder.handle_timeout(Instant::now())?;
//! }
//! ```

mod announce;
pub mod config;
mod coordinator;
mod entry;
pub mod error;
mod group;
mod handle;
mod iface;
pub mod record;
mod responder;
pub mod timeq;
pub mod transport;

#[cfg(test)]
mod testing;

pub use announce::{Announcement, AnnouncementId, AnnouncementState};
pub use config::EngineConfig;
pub use entry::{Entry, EntryId, PublishFlags};
pub use error::{CoreError, CoreResult};
pub use group::{EntryGroup, EntryGroupState, GroupEvent, GroupId};
pub use iface::{Interface, InterfaceId, InterfaceScope, InterfaceSpec, Protocol};
pub use record::{alternative_name, Record, RecordKey, RecordType};
pub use responder::Responder;
pub use transport::{PacketKind, Transport, TransportError};
