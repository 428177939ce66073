//! Error types for the core crate.

use thiserror::Error;

use crate::group::{EntryGroupState, GroupId};
use crate::transport::TransportError;

/// Core error types.
///
/// Protocol collisions are not errors: they surface as group state changes.
/// Only misuse of the publishing API and fatal transport faults end up here.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entry handle does not resolve (freed or never existed).
    #[error("unknown entry: {0}")]
    UnknownEntry(String),

    /// Group handle does not resolve.
    #[error("unknown entry group: {0}")]
    UnknownGroup(String),

    /// Interface handle does not resolve.
    #[error("unknown interface: {0}")]
    UnknownInterface(String),

    /// The operation is not allowed in the group's current state.
    #[error("entry group {group} is {state:?}, cannot {operation}")]
    BadState {
        group: GroupId,
        state: EntryGroupState,
        operation: &'static str,
    },

    /// Another local entry already claims this unique name.
    #[error("local name collision: {name} is already published")]
    LocalCollision { name: String },

    /// The record cannot be published as given.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Engine configuration is unusable.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// A fatal transport error, surfaced as a server-level fault.
    #[error("transport fault: {0}")]
    Transport(#[from] TransportError),
}

impl CoreError {
    /// Create an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
