//! Socket backend: the line protocol over [`XenaSocket`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::api::{ApiKind, ChassisAddr, XenaApi};
use crate::error::{Error, Result};
use crate::keepalive::KeepAliveAgent;
use crate::protocol;
use crate::reference::{ObjKind, Target};
use crate::transport::XenaSocket;

struct ChassisLink {
    socket: Arc<XenaSocket>,
    keepalive: KeepAliveAgent,
}

/// One socket (plus keep-alive agent) per chassis, shared by every
/// entity under the session.
#[derive(Default)]
pub struct CliBackend {
    owner: Mutex<Option<String>>,
    chassis: Mutex<HashMap<String, ChassisLink>>,
}

impl CliBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket_for(&self, target: &Target) -> Result<Arc<XenaSocket>> {
        self.chassis
            .lock()
            .get(&target.chassis)
            .map(|link| Arc::clone(&link.socket))
            .ok_or_else(|| Error::NotConnected(format!("no chassis at {}", target.chassis)))
    }

    fn owner(&self) -> Result<String> {
        self.owner
            .lock()
            .clone()
            .ok_or_else(|| Error::NotConnected("session not connected".to_string()))
    }
}

/// Fold echo-stripped `COMMAND [sub] value...` lines into the
/// attribute map. A line with no value tokens maps to `None`.
fn parse_attribute_lines(
    target: &Target,
    lines: &[String],
    attributes: &mut BTreeMap<String, Option<String>>,
) {
    let skip = target.value_skip();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(name) = tokens.first() else {
            continue;
        };
        let value = if tokens.len() > skip {
            Some(tokens[skip..].join(" ").replace('"', ""))
        } else {
            None
        };
        attributes.insert(name.to_lowercase(), value);
    }
}

impl XenaApi for CliBackend {
    fn kind(&self) -> ApiKind {
        ApiKind::Socket
    }

    fn connect(&self, owner: &str) -> Result<()> {
        *self.owner.lock() = Some(owner.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let links: Vec<(String, ChassisLink)> = self.chassis.lock().drain().collect();
        for (ip, mut link) in links {
            debug!(chassis = %ip, "closing chassis connection");
            link.keepalive.stop();
            link.socket.disconnect();
        }
        *self.owner.lock() = None;
        Ok(())
    }

    fn add_chassis(&self, chassis: &ChassisAddr) -> Result<()> {
        let owner = self.owner()?;
        info!(chassis = %chassis.ip, port = chassis.port, "connecting to chassis");
        let socket = Arc::new(XenaSocket::new(&chassis.ip, chassis.port));
        socket.connect()?;

        let target = Target {
            kind: ObjKind::Chassis,
            chassis: chassis.ip.clone(),
            index: String::new(),
            reference: String::new(),
        };
        let password = format!("\"{}\"", chassis.password);
        socket.send_command(&target.build_index_command("c_logon", &[&password]))?;
        let owner_arg = format!("\"{owner}\"");
        socket.send_command(&target.build_index_command("c_owner", &[&owner_arg]))?;

        let probe_socket = Arc::clone(&socket);
        let keepalive = KeepAliveAgent::spawn_default(socket.activity(), move || {
            probe_socket.send_query("").map(drop)
        })?;
        self.chassis
            .lock()
            .insert(chassis.ip.clone(), ChassisLink { socket, keepalive });
        Ok(())
    }

    fn create(&self, target: &Target) -> Result<()> {
        let command = target.kind.create_command().ok_or_else(|| Error::Parse {
            message: format!("{} entities cannot be created remotely", target.kind),
        })?;
        self.send_command(target, command, &[])
    }

    fn send_command(&self, target: &Target, command: &str, args: &[&str]) -> Result<()> {
        self.socket_for(target)?
            .send_command(&target.build_index_command(command, args))
    }

    fn send_command_return(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<String> {
        let reply = self
            .socket_for(target)?
            .send_query(&target.build_index_command(command, args))?;
        Ok(target.extract_return(command, &reply))
    }

    fn send_command_return_multilines(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<String>> {
        let lines = self
            .socket_for(target)?
            .send_query_multilines(&target.build_index_command(command, args))?;
        Ok(lines
            .iter()
            .map(|l| target.strip_index_echo(l).to_string())
            .collect())
    }

    fn get_attribute(&self, target: &Target, attribute: &str) -> Result<String> {
        let value = self
            .send_command_return(target, attribute, &["?"])
            .map_err(protocol::read_attribute_error)?;
        Ok(value.replace('"', ""))
    }

    fn get_attributes(&self, target: &Target) -> Result<BTreeMap<String, Option<String>>> {
        let mut attributes = BTreeMap::new();
        for info_command in target.kind.info_config_commands() {
            let lines = self.send_command_return_multilines(target, info_command, &["?"])?;
            parse_attribute_lines(target, &lines, &mut attributes);
        }
        Ok(attributes)
    }

    fn set_attributes(&self, target: &Target, attributes: &[(&str, &str)]) -> Result<()> {
        for (name, value) in attributes {
            self.send_command(target, name, &[value])
                .map_err(protocol::write_attribute_error)?;
        }
        Ok(())
    }
}
