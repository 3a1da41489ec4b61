//! Transports for the chassis scripting protocol.
//!
//! [`LineSocket`] owns the raw TCP connection and newline framing;
//! [`XenaSocket`] adds the one-slot in-flight lock and reply
//! classification on top. Replies carry no correlation IDs, so a
//! command's full round trip (including multi-line sentinel collection)
//! happens under one lock acquisition.

mod line;
mod socket;

pub use line::LineSocket;
pub use socket::XenaSocket;
