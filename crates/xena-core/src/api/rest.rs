//! REST backend: the same operations mapped onto the session resource
//! tree exposed by the REST server.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};
use ureq::Agent;

use crate::api::{ApiKind, ChassisAddr, XenaApi};
use crate::error::{Error, Result};
use crate::keepalive::{Activity, KeepAliveAgent};
use crate::reference::{ObjKind, Target};

use std::collections::BTreeMap;

/// Command output shape requested from the REST server.
#[derive(Debug, Clone, Copy)]
enum ReturnType {
    NoOutput,
    LineOutput,
    MultilineOutput,
}

impl ReturnType {
    fn as_str(self) -> &'static str {
        match self {
            ReturnType::NoOutput => "no_output",
            ReturnType::LineOutput => "line_output",
            ReturnType::MultilineOutput => "multiline_output",
        }
    }
}

/// REST backend: one HTTP agent, one session resource, one keep-alive
/// agent probing the user resource.
pub struct RestBackend {
    agent: Agent,
    session_url: String,
    user_url: Mutex<Option<String>>,
    activity: Arc<Activity>,
    keepalive: Mutex<Option<KeepAliveAgent>>,
}

impl RestBackend {
    pub fn new(server: &str, port: u16) -> Self {
        Self {
            agent: Agent::new(),
            session_url: format!("http://{server}:{port}/session"),
            user_url: Mutex::new(None),
            activity: Arc::new(Activity::new()),
            keepalive: Mutex::new(None),
        }
    }

    fn user_url(&self) -> Result<String> {
        self.user_url
            .lock()
            .clone()
            .ok_or_else(|| Error::NotConnected("session not connected".to_string()))
    }

    fn obj_url(&self, target: &Target) -> String {
        format!("{}/{}", self.session_url, target.reference)
    }

    /// Issue one request, mapping HTTP failures onto [`Error::Rest`].
    /// `ignore_status` swallows status errors (session creation is
    /// idempotent but the server rejects a duplicate).
    fn request(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        ignore_status: bool,
    ) -> Result<Option<Value>> {
        self.activity.touch();
        debug!(method, url, "rest request");
        let mut req = self.agent.request(method, url);
        for (name, value) in query {
            req = req.query(name, value);
        }
        let outcome = match body {
            Some(json) => req.send_json(json),
            None => req.call(),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                if ignore_status {
                    return Ok(None);
                }
                let body = response.into_string().unwrap_or_default();
                return Err(Error::Rest { status, body });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    transport.to_string(),
                )));
            }
        };
        let text = response.into_string()?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&text).map_err(|e| Error::Parse {
            message: format!("invalid json from {url}: {e}"),
        })?;
        Ok(Some(value))
    }

    fn perform_command(
        &self,
        target: &Target,
        command: &str,
        return_type: ReturnType,
        args: &[&str],
    ) -> Result<Option<Value>> {
        let obj_url = self.obj_url(target);
        // Raw module/port-addressed lines on a chassis bypass the
        // command tree through the backdoor resource.
        if target.kind == ObjKind::Chassis
            && command.trim().chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            let url = format!("{obj_url}/backdoor");
            let line = if args.is_empty() {
                command.trim().to_string()
            } else {
                format!("{} {}", command.trim(), args.join(" "))
            };
            let body = json!({ "return_type": return_type.as_str(), "command": line });
            return self.request("POST", &url, &[], Some(body), false);
        }
        let url = format!("{obj_url}/commands/{command}");
        let body = json!({ "return_type": return_type.as_str(), "parameters": args });
        self.request("POST", &url, &[], Some(body), false)
    }
}

impl XenaApi for RestBackend {
    fn kind(&self) -> ApiKind {
        ApiKind::Rest
    }

    fn connect(&self, owner: &str) -> Result<()> {
        info!(session = %self.session_url, owner, "opening rest session");
        self.request("POST", &self.session_url, &[("user", owner)], None, true)?;
        let user_url = format!("{}/{owner}", self.session_url);
        *self.user_url.lock() = Some(user_url.clone());

        let agent = self.agent.clone();
        let keepalive = KeepAliveAgent::spawn_default(Arc::clone(&self.activity), move || {
            agent
                .get(&user_url)
                .call()
                .map(drop)
                .map_err(|e| Error::Parse {
                    message: format!("keep-alive probe failed: {e}"),
                })
        })?;
        *self.keepalive.lock() = Some(keepalive);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        if let Some(mut keepalive) = self.keepalive.lock().take() {
            keepalive.stop();
        }
        let user_url = self.user_url()?;
        info!(session = %user_url, "closing rest session");
        self.request("DELETE", &user_url, &[], None, false)?;
        *self.user_url.lock() = None;
        Ok(())
    }

    fn add_chassis(&self, chassis: &ChassisAddr) -> Result<()> {
        let url = format!("{}/chassis", self.user_url()?);
        let port = chassis.port.to_string();
        self.request(
            "POST",
            &url,
            &[("ip", chassis.ip.as_str()), ("port", port.as_str())],
            None,
            false,
        )?;
        Ok(())
    }

    fn create(&self, target: &Target) -> Result<()> {
        let parent_ref = target
            .reference
            .rsplit_once('/')
            .map(|(parent, _)| parent)
            .unwrap_or(target.reference.as_str());
        let url = format!("{}/{parent_ref}", self.session_url);
        self.request("POST", &url, &[], None, false)?;
        Ok(())
    }

    fn send_command(&self, target: &Target, command: &str, args: &[&str]) -> Result<()> {
        self.perform_command(target, command, ReturnType::NoOutput, args)?;
        Ok(())
    }

    fn send_command_return(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<String> {
        let value = self.perform_command(target, command, ReturnType::LineOutput, args)?;
        match value {
            Some(Value::String(line)) => Ok(line),
            other => Err(Error::Parse {
                message: format!("expected line output for `{command}`, got {other:?}"),
            }),
        }
    }

    fn send_command_return_multilines(
        &self,
        target: &Target,
        command: &str,
        args: &[&str],
    ) -> Result<Vec<String>> {
        let value = self.perform_command(target, command, ReturnType::MultilineOutput, args)?;
        match value {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(line) => Ok(line),
                    other => Err(Error::Parse {
                        message: format!("non-string line in `{command}` output: {other:?}"),
                    }),
                })
                .collect(),
            other => Err(Error::Parse {
                message: format!("expected multiline output for `{command}`, got {other:?}"),
            }),
        }
    }

    fn get_attribute(&self, target: &Target, attribute: &str) -> Result<String> {
        let mut attributes = self.get_attributes(target)?;
        match attributes.remove(attribute) {
            Some(Some(value)) => Ok(value.replace('"', "")),
            _ => Err(Error::Attribute {
                command: attribute.to_string(),
                reply: "attribute not present on resource".to_string(),
            }),
        }
    }

    fn get_attributes(&self, target: &Target) -> Result<BTreeMap<String, Option<String>>> {
        let url = format!("{}/attributes", self.obj_url(target));
        let value = self.request("GET", &url, &[], None, false)?;
        let Some(Value::Array(items)) = value else {
            return Err(Error::Parse {
                message: format!("expected attribute array from {url}"),
            });
        };
        let mut attributes = BTreeMap::new();
        for item in items {
            let name = item.get("name").and_then(Value::as_str);
            let value = item.get("value").and_then(Value::as_str);
            if let Some(name) = name {
                attributes.insert(
                    name.to_lowercase(),
                    value.map(|v| v.replace('"', "")),
                );
            }
        }
        Ok(attributes)
    }

    fn set_attributes(&self, target: &Target, attributes: &[(&str, &str)]) -> Result<()> {
        let url = format!("{}/attributes", self.obj_url(target));
        let body: Vec<Value> = attributes
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        self.request("PATCH", &url, &[], Some(Value::Array(body)), false)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_type_wire_names() {
        assert_eq!(ReturnType::NoOutput.as_str(), "no_output");
        assert_eq!(ReturnType::LineOutput.as_str(), "line_output");
        assert_eq!(ReturnType::MultilineOutput.as_str(), "multiline_output");
    }

    #[test]
    fn commands_require_connected_session() {
        let api = RestBackend::new("127.0.0.1", 1);
        let err = api.add_chassis(&ChassisAddr::new("10.1.1.1")).unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[test]
    fn create_posts_to_parent_resource() {
        let target = Target {
            kind: ObjKind::Stream,
            chassis: "10.1.1.1".to_string(),
            index: "3/0/1".to_string(),
            reference: "tester/10.1.1.1/3/0/1".to_string(),
        };
        let parent = target.reference.rsplit_once('/').map(|(p, _)| p);
        assert_eq!(parent, Some("tester/10.1.1.1/3/0"));
    }
}
