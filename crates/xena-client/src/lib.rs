//! xena-client: Object tree for Xena traffic generator chassis.
//!
//! Provides:
//! - Session management over a socket or REST backend
//! - Chassis, module and port objects with reservation handling
//! - Stream building with packet headers and field modifiers
//! - Filters, match terms and length terms
//! - Capture control and captured packet access
//! - Session-wide statistics views

pub mod capture;
pub mod chassis;
pub mod filter;
pub mod object;
pub mod port;
pub mod reservation;
pub mod session;
pub mod stats;
pub mod stream;

pub use capture::{CaptureFormat, XenaCapture, XenaCapturePacket};
pub use chassis::{XenaChassis, XenaModule};
pub use filter::{FilterState, XenaFilter, XenaLength, XenaMatch};
pub use object::{SessionCore, XenaEntity};
pub use port::{XenaPort, XenaTpld};
pub use reservation::ReservationState;
pub use session::XenaSession;
pub use stats::{StreamStats, XenaPortsStats, XenaStreamsStats, XenaTpldsStats};
pub use stream::{
    ModifierAction, ModifierKind, ModifierRange, ModifierSpec, StreamState, XenaModifier,
    XenaStream,
};
