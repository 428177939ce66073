//! Testing utilities, fixtures, and fakes for beacon.
//!
//! - **Transport**: [`RecordingTransport`] keeps every packet the engine sends
//!   and can inject send failures.
//! - **Clock**: [`VirtualClock`] drives a responder through virtual time,
//!   firing each timer at its own deadline.
//! - **Fixtures**: common interfaces, addresses, records and temporary hosts
//!   files.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use beacon_test_utils::{fixtures, RecordingTransport, VirtualClock};
//!
//! let transport = RecordingTransport::new();
//! let clock = VirtualClock::new();
//! let mut responder = clock.responder(transport.clone());
//! responder.add_interface(fixtures::eth(1));
//!
//! clock.advance(&mut responder, Duration::from_secs(5)).unwrap();
//! assert_eq!(transport.count(PacketKind::Probe), 0);
//! ```

pub mod clock;
pub mod fixtures;
pub mod transport;

pub use clock::VirtualClock;
pub use transport::{RecordingTransport, SentPacket};
