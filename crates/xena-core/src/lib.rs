//! xena-core: Shared library for chassis transport, wire protocol, and
//! command dispatch.
//!
//! This crate provides:
//! - Line protocol framing and reply classification
//! - Entity references and index-aware command rendering
//! - The socket and REST backends behind one capability trait
//! - Keep-alive agents for idle sessions
//! - Logging and error types

pub mod api;
pub mod constants;
pub mod error;
pub mod keepalive;
pub mod logging;
pub mod protocol;
pub mod reference;
pub mod transport;

pub use api::{ApiKind, ChassisAddr, CliBackend, RestBackend, XenaApi};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
pub use reference::{ObjKind, Target};
