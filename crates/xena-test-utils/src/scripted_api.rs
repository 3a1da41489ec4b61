//! Scripted in-memory backend for exercising the object tree without a
//! socket or REST server.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use xena_core::api::{ApiKind, ChassisAddr, XenaApi};
use xena_core::error::{Error, Result};
use xena_core::reference::Target;

type Key = (String, String);

/// Mock backend: records every dispatched command line and replays
/// stubbed replies keyed by `(reference, command)`.
///
/// Writes are remembered, so a `set_attributes` followed by
/// `get_attribute` round-trips without stubbing.
pub struct ScriptedApi {
    kind: ApiKind,
    log: Mutex<Vec<String>>,
    attributes: Mutex<HashMap<Key, String>>,
    returns: Mutex<HashMap<Key, String>>,
    multilines: Mutex<HashMap<Key, Vec<String>>>,
}

impl ScriptedApi {
    pub fn new(kind: ApiKind) -> Self {
        Self {
            kind,
            log: Mutex::new(Vec::new()),
            attributes: Mutex::new(HashMap::new()),
            returns: Mutex::new(HashMap::new()),
            multilines: Mutex::new(HashMap::new()),
        }
    }

    /// Stub an attribute value for one entity.
    pub fn stub_attribute(&self, reference: &str, name: &str, value: &str) {
        self.attributes
            .lock()
            .insert((reference.to_string(), name.to_lowercase()), value.to_string());
    }

    /// Stub a single-line command reply (already echo-stripped).
    pub fn stub_return(&self, reference: &str, command: &str, value: &str) {
        self.returns
            .lock()
            .insert((reference.to_string(), command.to_lowercase()), value.to_string());
    }

    /// Stub a multi-line command reply.
    pub fn stub_multiline(&self, reference: &str, command: &str, lines: &[&str]) {
        self.multilines.lock().insert(
            (reference.to_string(), command.to_lowercase()),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Every command line dispatched so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, target: &Target, command: &str, args: &[&str]) {
        self.log
            .lock()
            .push(target.build_index_command(command, args));
    }
}

impl XenaApi for ScriptedApi {
    fn kind(&self) -> ApiKind {
        self.kind
    }

    fn connect(&self, owner: &str) -> Result<()> {
        self.log.lock().push(format!("connect {owner}"));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.log.lock().push("disconnect".to_string());
        Ok(())
    }

    fn add_chassis(&self, chassis: &ChassisAddr) -> Result<()> {
        self.log
            .lock()
            .push(format!("add_chassis {}:{}", chassis.ip, chassis.port));
        Ok(())
    }

    fn create(&self, target: &Target) -> Result<()> {
        self.log.lock().push(format!("create {}", target.reference));
        Ok(())
    }

    fn send_command(&self, target: &Target, command: &str, args: &[&str]) -> Result<()> {
        self.record(target, command, args);
        if args != ["?"] {
            self.attributes.lock().insert(
                (target.reference.clone(), command.to_lowercase()),
                args.join(" ").replace('"', ""),
            );
        }
        Ok(())
    }

    fn send_command_return(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<String> {
        self.record(target, command, args);
        let key = (target.reference.clone(), command.to_lowercase());
        if let Some(value) = self.returns.lock().get(&key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.attributes.lock().get(&key) {
            return Ok(value.clone());
        }
        Err(Error::Parse {
            message: format!("no scripted reply for `{command}` on {}", target.reference),
        })
    }

    fn send_command_return_multilines(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<String>> {
        self.record(target, command, args);
        let key = (target.reference.clone(), command.to_lowercase());
        Ok(self.multilines.lock().get(&key).cloned().unwrap_or_default())
    }

    fn get_attribute(&self, target: &Target, attribute: &str) -> Result<String> {
        self.record(target, attribute, &["?"]);
        let key = (target.reference.clone(), attribute.to_lowercase());
        if let Some(value) = self.attributes.lock().get(&key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.returns.lock().get(&key) {
            return Ok(value.clone());
        }
        Err(Error::Attribute {
            command: attribute.to_string(),
            reply: format!("no scripted attribute on {}", target.reference),
        })
    }

    fn get_attributes(&self, target: &Target) -> Result<BTreeMap<String, Option<String>>> {
        let mut out = BTreeMap::new();
        for ((reference, name), value) in self.attributes.lock().iter() {
            if reference == &target.reference {
                out.insert(name.clone(), Some(value.clone()));
            }
        }
        Ok(out)
    }

    fn set_attributes(&self, target: &Target, attributes: &[(&str, &str)]) -> Result<()> {
        for (name, value) in attributes {
            self.send_command(target, name, &[value])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::reference::ObjKind;

    fn port_target() -> Target {
        Target {
            kind: ObjKind::Port,
            chassis: "10.1.1.1".to_string(),
            index: "3/0".to_string(),
            reference: "tester/10.1.1.1/3/0".to_string(),
        }
    }

    #[test]
    fn writes_read_back() {
        let api = ScriptedApi::new(ApiKind::Socket);
        let target = port_target();
        api.set_attributes(&target, &[("p_comment", "\"dut\"")]).unwrap();
        assert_eq!(api.get_attribute(&target, "p_comment").unwrap(), "dut");
        assert_eq!(api.commands(), vec!["3/0 p_comment \"dut\"", "3/0 p_comment ?"]);
    }

    #[test]
    fn stats_come_from_stubbed_returns() {
        let api = ScriptedApi::new(ApiKind::Socket);
        let target = port_target();
        api.stub_return(&target.reference, "pr_total", "12 960 100 800");
        assert_eq!(api.get_stats(&target, "pr_total").unwrap(), vec![12, 960, 100, 800]);
    }
}
