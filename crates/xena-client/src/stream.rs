//! Streams and their field modifiers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use xena_core::api::ApiKind;
use xena_core::error::{Error, Result};
use xena_core::reference::{ObjKind, Target};

use crate::object::{SessionCore, XenaEntity};

pub(crate) const STREAM_STATS_CAPTIONS: &[&str] = &["bps", "pps", "bytes", "packets"];

/// Stream scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Enabled,
    Disabled,
    Suspended,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Enabled => "ON",
            StreamState::Disabled => "OFF",
            StreamState::Suspended => "SUPPRESS",
        }
    }
}

/// Standard modifiers rewrite a 16-bit field; extended ones a 24-bit
/// field. The two variants use disjoint command pairs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKind {
    Standard,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierAction {
    Increment,
    Decrement,
    Random,
}

impl ModifierAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModifierAction::Increment => "INC",
            ModifierAction::Decrement => "DEC",
            ModifierAction::Random => "RANDOM",
        }
    }
}

impl FromStr for ModifierAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "INC" => Ok(ModifierAction::Increment),
            "DEC" => Ok(ModifierAction::Decrement),
            "RANDOM" => Ok(ModifierAction::Random),
            other => Err(Error::Parse {
                message: format!("unknown modifier action `{other}`"),
            }),
        }
    }
}

impl fmt::Display for ModifierAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value sweep of a non-random modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierRange {
    pub min: u32,
    pub step: u32,
    pub max: u32,
}

/// Full modifier configuration as written to the chassis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierSpec {
    /// Byte offset of the rewritten field within the packet header.
    pub position: u32,
    /// Bit mask, rendered as `0x`-prefixed hex.
    pub mask: String,
    pub action: ModifierAction,
    pub repeat: u32,
    /// Required unless `action` is `Random`.
    pub range: Option<ModifierRange>,
}

/// A single traffic stream under a port.
pub struct XenaStream {
    core: Arc<SessionCore>,
    target: Target,
    name: Mutex<String>,
    modifiers: Mutex<Vec<Arc<XenaModifier>>>,
    xmodifiers: Mutex<Vec<Arc<XenaModifier>>>,
}

impl XenaEntity for XenaStream {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }

    fn name(&self) -> String {
        self.name.lock().clone()
    }
}

impl XenaStream {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        port_target: &Target,
        id: u32,
        name: Option<String>,
    ) -> Self {
        let index = format!("{}/{id}", port_target.index);
        let target = Target {
            kind: ObjKind::Stream,
            chassis: port_target.chassis.clone(),
            index: index.clone(),
            reference: format!("{}/{id}", port_target.reference),
        };
        Self {
            core,
            target,
            name: Mutex::new(name.unwrap_or(index)),
            modifiers: Mutex::new(Vec::new()),
            xmodifiers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn set_state(&self, state: StreamState) -> Result<()> {
        self.set_attributes(&[("ps_enable", state.as_str())])
    }

    /// Transmit counters for this stream.
    pub fn read_stats(&self) -> Result<BTreeMap<String, u64>> {
        self.read_stat(STREAM_STATS_CAPTIONS, "pt_stream")
    }

    /// Test-payload id carried by this stream, `None` when disabled.
    pub fn tpld_id(&self) -> Result<Option<u32>> {
        let value = self.get_attribute("ps_tpldid")?;
        let id: i64 = value.trim().parse().map_err(|_| Error::Parse {
            message: format!("bad ps_tpldid value `{value}`"),
        })?;
        Ok(u32::try_from(id).ok())
    }

    /// Raw packet header bytes, decoded from the `0x`-prefixed hex the
    /// chassis stores.
    pub fn get_packet_header(&self) -> Result<Vec<u8>> {
        let value = self.get_attribute("ps_packetheader")?;
        let hex_str = value.strip_prefix("0x").ok_or_else(|| Error::Parse {
            message: format!("packet header `{value}` is not 0x-prefixed"),
        })?;
        hex::decode(hex_str).map_err(|e| Error::Parse {
            message: format!("bad packet header hex: {e}"),
        })
    }

    pub fn set_packet_header(&self, header: &[u8]) -> Result<()> {
        let value = format!("0x{}", hex::encode(header));
        self.set_attributes(&[("ps_packetheader", &value)])
    }

    /// Declare the protocol segment layout of the header, so the
    /// chassis and its GUI know how to interpret the raw bytes.
    pub fn set_header_protocol(&self, segments: &[&str]) -> Result<()> {
        self.set_attributes(&[("ps_headerprotocol", &segments.join(" "))])
    }

    pub(crate) fn delete(&self) -> Result<()> {
        self.send_command("ps_delete", &[])
    }

    /// Standard modifiers, loaded from the chassis on first access.
    pub fn modifiers(&self) -> Result<Vec<Arc<XenaModifier>>> {
        self.load_modifiers(ModifierKind::Standard)?;
        Ok(self.modifiers.lock().clone())
    }

    /// Extended modifiers. Ports without extended modifier support
    /// reject the count query; that reads as "none".
    pub fn xmodifiers(&self) -> Result<Vec<Arc<XenaModifier>>> {
        if let Err(e) = self.load_modifiers(ModifierKind::Extended) {
            if e.is_request_error() {
                debug!(stream = %self.target.index, "extended modifiers unsupported");
                self.xmodifiers.lock().clear();
                return Ok(Vec::new());
            }
            return Err(e);
        }
        Ok(self.xmodifiers.lock().clone())
    }

    pub fn add_modifier(
        &self,
        kind: ModifierKind,
        spec: &ModifierSpec,
    ) -> Result<Arc<XenaModifier>> {
        self.load_modifiers(kind).or_else(|e| {
            if kind == ModifierKind::Extended && e.is_request_error() {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        let slot = self.slot(kind);
        let id = slot.lock().len() as u32;
        let modifier = Arc::new(XenaModifier::new(
            Arc::clone(&self.core),
            &self.target,
            kind,
            id,
        ));
        // The wire protocol has no create command for modifiers; they
        // come into existence by raising the count attribute. The REST
        // hierarchy exposes them as regular child resources.
        match self.core.api().kind() {
            ApiKind::Socket => {
                let count = (id + 1).to_string();
                self.set_attributes(&[(kind.count_attribute(), &count)])?;
            }
            ApiKind::Rest => self.core.api().create(modifier.target())?,
        }
        modifier.apply(spec)?;
        slot.lock().push(Arc::clone(&modifier));
        Ok(modifier)
    }

    /// Remove one modifier. The chassis only shrinks the set from the
    /// tail, so the survivors are torn down and rebuilt.
    pub fn remove_modifier(&self, kind: ModifierKind, id: u32) -> Result<()> {
        self.load_modifiers(kind)?;
        let survivors: Vec<ModifierSpec> = {
            let slot = self.slot(kind).lock();
            if !slot.iter().any(|m| m.id() == Some(id)) {
                return Err(Error::Parse {
                    message: format!("no {kind:?} modifier with id {id}"),
                });
            }
            slot.iter()
                .filter(|m| m.id() != Some(id))
                .filter_map(|m| m.spec())
                .collect()
        };
        self.set_attributes(&[(kind.count_attribute(), "0")])?;
        self.slot(kind).lock().clear();
        for spec in &survivors {
            self.add_modifier(kind, spec)?;
        }
        Ok(())
    }

    fn slot(&self, kind: ModifierKind) -> &Mutex<Vec<Arc<XenaModifier>>> {
        match kind {
            ModifierKind::Standard => &self.modifiers,
            ModifierKind::Extended => &self.xmodifiers,
        }
    }

    fn load_modifiers(&self, kind: ModifierKind) -> Result<()> {
        if !self.slot(kind).lock().is_empty() {
            return Ok(());
        }
        let count: u32 = self
            .get_attribute(kind.count_attribute())?
            .trim()
            .parse()
            .unwrap_or(0);
        let mut loaded = Vec::with_capacity(count as usize);
        for id in 0..count {
            let modifier = Arc::new(XenaModifier::new(
                Arc::clone(&self.core),
                &self.target,
                kind,
                id,
            ));
            modifier.load()?;
            loaded.push(modifier);
        }
        *self.slot(kind).lock() = loaded;
        Ok(())
    }
}

impl ModifierKind {
    fn count_attribute(self) -> &'static str {
        match self {
            ModifierKind::Standard => "ps_modifiercount",
            ModifierKind::Extended => "ps_modifierextcount",
        }
    }

    fn spec_command(self) -> &'static str {
        match self {
            ModifierKind::Standard => "ps_modifier",
            ModifierKind::Extended => "ps_modifierext",
        }
    }

    fn range_command(self) -> &'static str {
        match self {
            ModifierKind::Standard => "ps_modifierrange",
            ModifierKind::Extended => "ps_modifierextrange",
        }
    }
}

/// One field modifier attached to a stream.
pub struct XenaModifier {
    core: Arc<SessionCore>,
    target: Target,
    kind: ModifierKind,
    spec: Mutex<Option<ModifierSpec>>,
}

impl XenaEntity for XenaModifier {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaModifier {
    fn new(core: Arc<SessionCore>, stream_target: &Target, kind: ModifierKind, id: u32) -> Self {
        let obj_kind = match kind {
            ModifierKind::Standard => ObjKind::Modifier,
            ModifierKind::Extended => ObjKind::Xmodifier,
        };
        let target = Target {
            kind: obj_kind,
            chassis: stream_target.chassis.clone(),
            index: format!("{}/{id}", stream_target.index),
            reference: format!("{}/{id}", stream_target.reference),
        };
        Self {
            core,
            target,
            kind,
            spec: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ModifierKind {
        self.kind
    }

    /// Last configuration written to or read from the chassis.
    pub fn spec(&self) -> Option<ModifierSpec> {
        self.spec.lock().clone()
    }

    /// Write a configuration to the chassis.
    pub fn apply(&self, spec: &ModifierSpec) -> Result<()> {
        if spec.action != ModifierAction::Random && spec.range.is_none() {
            return Err(Error::Parse {
                message: format!("{} modifier requires a range", spec.action),
            });
        }
        let value = format!(
            "{} {} {} {}",
            spec.position, spec.mask, spec.action, spec.repeat
        );
        self.set_attributes(&[(self.kind.spec_command(), &value)])?;
        if spec.action != ModifierAction::Random {
            if let Some(range) = spec.range {
                let value = format!("{} {} {}", range.min, range.step, range.max);
                self.set_attributes(&[(self.kind.range_command(), &value)])?;
            }
        }
        *self.spec.lock() = Some(spec.clone());
        Ok(())
    }

    /// Read the configuration back from the chassis.
    pub fn load(&self) -> Result<ModifierSpec> {
        let value = self.get_attribute(self.kind.spec_command())?;
        let tokens: Vec<&str> = value.split_whitespace().collect();
        let [position, mask, action, repeat] = tokens[..] else {
            return Err(Error::Parse {
                message: format!("bad modifier reply `{value}`"),
            });
        };
        let action: ModifierAction = action.parse()?;
        let mask_bits = u64::from_str_radix(mask.trim_start_matches("0x"), 16).map_err(|_| {
            Error::Parse {
                message: format!("bad modifier mask `{mask}`"),
            }
        })?;
        let range = if action != ModifierAction::Random {
            let value = self.get_attribute(self.kind.range_command())?;
            let parts: Vec<&str> = value.split_whitespace().collect();
            let [min, step, max] = parts[..] else {
                return Err(Error::Parse {
                    message: format!("bad modifier range reply `{value}`"),
                });
            };
            Some(ModifierRange {
                min: parse_u32(min)?,
                step: parse_u32(step)?,
                max: parse_u32(max)?,
            })
        } else {
            None
        };
        let spec = ModifierSpec {
            position: parse_u32(position)?,
            mask: format!("0x{mask_bits:X}"),
            action,
            repeat: parse_u32(repeat)?,
            range,
        };
        *self.spec.lock() = Some(spec.clone());
        Ok(spec)
    }
}

fn parse_u32(token: &str) -> Result<u32> {
    token.trim().parse().map_err(|_| Error::Parse {
        message: format!("expected integer, got `{token}`"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_test_utils::ScriptedApi;

    fn stream_with_api() -> (Arc<ScriptedApi>, XenaStream) {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        let core = Arc::new(SessionCore::new("tester", api.clone()));
        let port_target = Target {
            kind: ObjKind::Port,
            chassis: "10.1.1.1".to_string(),
            index: "3/0".to_string(),
            reference: "tester/10.1.1.1/3/0".to_string(),
        };
        let stream = XenaStream::new(core, &port_target, 1, Some("s1".to_string()));
        (api, stream)
    }

    #[test]
    fn packet_header_round_trips_hex() {
        let (_, stream) = stream_with_api();
        stream.set_packet_header(&[0x22, 0x22, 0x22, 0x22, 0x22, 0x11]).unwrap();
        assert_eq!(
            stream.get_packet_header().unwrap(),
            vec![0x22, 0x22, 0x22, 0x22, 0x22, 0x11]
        );
    }

    #[test]
    fn malformed_header_is_a_parse_error() {
        let (api, stream) = stream_with_api();
        api.stub_attribute(&stream.target().reference, "ps_packetheader", "feedface");
        assert!(matches!(
            stream.get_packet_header().unwrap_err(),
            Error::Parse { .. }
        ));
    }

    #[test]
    fn tpld_id_treats_negative_as_disabled() {
        let (api, stream) = stream_with_api();
        api.stub_attribute(&stream.target().reference, "ps_tpldid", "-1");
        assert_eq!(stream.tpld_id().unwrap(), None);
        api.stub_attribute(&stream.target().reference, "ps_tpldid", "7");
        assert_eq!(stream.tpld_id().unwrap(), Some(7));
    }

    #[test]
    fn add_modifier_raises_count_then_configures() {
        let (api, stream) = stream_with_api();
        api.stub_attribute(&stream.target().reference, "ps_modifiercount", "0");
        let spec = ModifierSpec {
            position: 4,
            mask: "0xFFFF0000".to_string(),
            action: ModifierAction::Increment,
            repeat: 1,
            range: Some(ModifierRange { min: 0, step: 1, max: 100 }),
        };
        let modifier = stream.add_modifier(ModifierKind::Standard, &spec).unwrap();
        assert_eq!(modifier.id(), Some(0));
        let commands = api.commands();
        assert!(commands.contains(&"3/0 ps_modifiercount [1] 1".to_string()));
        assert!(commands.contains(&"3/0 ps_modifier [1,0] 4 0xFFFF0000 INC 1".to_string()));
        assert!(commands.contains(&"3/0 ps_modifierrange [1,0] 0 1 100".to_string()));
    }

    #[test]
    fn non_random_modifier_requires_a_range() {
        let (api, stream) = stream_with_api();
        api.stub_attribute(&stream.target().reference, "ps_modifiercount", "0");
        let spec = ModifierSpec {
            position: 0,
            mask: "0xFF".to_string(),
            action: ModifierAction::Decrement,
            repeat: 1,
            range: None,
        };
        assert!(stream.add_modifier(ModifierKind::Standard, &spec).is_err());
    }

    #[test]
    fn modifier_load_parses_and_normalizes_mask() {
        let (api, stream) = stream_with_api();
        api.stub_attribute(&stream.target().reference, "ps_modifiercount", "1");
        api.stub_attribute(
            "tester/10.1.1.1/3/0/1/0",
            "ps_modifier",
            "4 0xffff0000 INC 1",
        );
        api.stub_attribute("tester/10.1.1.1/3/0/1/0", "ps_modifierrange", "0 1 100");
        let modifiers = stream.modifiers().unwrap();
        assert_eq!(modifiers.len(), 1);
        let spec = modifiers[0].spec().unwrap();
        assert_eq!(spec.mask, "0xFFFF0000");
        assert_eq!(spec.range, Some(ModifierRange { min: 0, step: 1, max: 100 }));
    }
}
