//! Command-dispatch backends.
//!
//! The object tree talks to exactly one implementation of [`XenaApi`]
//! per session, selected at construction time: [`CliBackend`] speaks
//! the line protocol over [`crate::transport::XenaSocket`];
//! [`RestBackend`] maps the same operations onto the REST resource
//! hierarchy. Entity code never branches on the concrete backend.

mod cli;
mod rest;

pub use cli::CliBackend;
pub use rest::RestBackend;

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::reference::Target;

/// Which concrete backend a session runs on.
///
/// Needed only where the wire protocols genuinely diverge (modifier
/// creation has no CLI create command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    Socket,
    Rest,
}

/// Address and credentials of one chassis.
#[derive(Debug, Clone)]
pub struct ChassisAddr {
    pub ip: String,
    pub port: u16,
    pub password: String,
}

impl ChassisAddr {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            port: crate::constants::DEFAULT_CHASSIS_PORT,
            password: crate::constants::DEFAULT_PASSWORD.to_string(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }
}

/// Backend capability shared by the socket and REST variants.
///
/// All methods take `&self`; implementations use interior mutability so
/// one backend instance can be shared by every node under a session.
pub trait XenaApi: Send + Sync {
    fn kind(&self) -> ApiKind;

    /// Open the scripting session for `owner`.
    fn connect(&self, owner: &str) -> Result<()>;

    /// Tear the session down, stopping keep-alive agents first.
    fn disconnect(&self) -> Result<()>;

    /// Register (and for the socket variant, connect and log on to) a
    /// chassis under this session.
    fn add_chassis(&self, chassis: &ChassisAddr) -> Result<()>;

    /// Instantiate `target` on the chassis using its kind's create
    /// command.
    fn create(&self, target: &Target) -> Result<()>;

    /// Send a command with no output.
    fn send_command(&self, target: &Target, command: &str, args: &[&str]) -> Result<()>;

    /// Send a command and return its single-line output, echo-stripped.
    fn send_command_return(&self, target: &Target, command: &str, args: &[&str])
        -> Result<String>;

    /// Send a command and return its multi-line output. Lines keep
    /// their per-line command echo but the reference prefix is
    /// stripped.
    fn send_command_return_multilines(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<String>>;

    /// Query a single attribute.
    fn get_attribute(&self, target: &Target, attribute: &str) -> Result<String>;

    /// Query all attributes via the kind's info/config commands.
    ///
    /// A reply line shorter than expected yields `None` for that
    /// attribute (the device omits trailing optional fields).
    fn get_attributes(&self, target: &Target) -> Result<BTreeMap<String, Option<String>>>;

    /// Set attributes, one command per pair.
    fn set_attributes(&self, target: &Target, attributes: &[(&str, &str)]) -> Result<()>;

    /// Query a statistics group: a line of space-delimited counters.
    fn get_stats(&self, target: &Target, stat_name: &str) -> Result<Vec<u64>> {
        let reply = self.send_command_return(target, stat_name, &["?"])?;
        reply
            .split_whitespace()
            .map(|v| {
                v.parse::<u64>().map_err(|_| Error::Parse {
                    message: format!("non-numeric counter `{v}` in `{stat_name}` reply"),
                })
            })
            .collect()
    }
}
