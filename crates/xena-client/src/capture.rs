//! Capture buffer access: capture status and captured packets.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use xena_core::error::{Error, Result};
use xena_core::reference::{ObjKind, Target};

use crate::object::{SessionCore, XenaEntity};

pub(crate) const CAPTURE_STATS_CAPTIONS: &[&str] = &["status", "packets", "starttime"];

/// Rendering of packets pulled from the capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    /// Bare hex strings, one per packet.
    Raw,
    /// Hex dump with per-16-byte offsets, as the GUI shows it.
    Text,
}

/// Capture state of one port. Commands are port-scoped; the capture
/// object only adds the packet children.
pub struct XenaCapture {
    core: Arc<SessionCore>,
    target: Target,
}

impl XenaEntity for XenaCapture {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaCapture {
    pub(crate) fn new(core: Arc<SessionCore>, port_target: &Target) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::Capture,
                chassis: port_target.chassis.clone(),
                index: port_target.index.clone(),
                reference: format!("{}/capture", port_target.reference),
            },
        }
    }

    /// Capture status counters (status, packets, starttime).
    pub fn read_stats(&self) -> Result<BTreeMap<String, u64>> {
        self.read_stat(CAPTURE_STATS_CAPTIONS, "pc_stats")
    }

    /// The packets currently in the buffer. Rebuilt on every call; the
    /// buffer content changes whenever capture restarts.
    pub fn packets(&self) -> Result<Vec<Arc<XenaCapturePacket>>> {
        let count = *self.read_stats()?.get("packets").ok_or_else(|| Error::Parse {
            message: "pc_stats reply missing packet count".to_string(),
        })?;
        Ok((0..count as u32)
            .map(|id| {
                Arc::new(XenaCapturePacket::new(
                    Arc::clone(&self.core),
                    &self.target,
                    id,
                ))
            })
            .collect())
    }

    /// Pull packets `[from, to)` from the buffer (`to = None` reads to
    /// the end), rendered per `format` and optionally saved to a file.
    pub fn get_packets(
        &self,
        from: u32,
        to: Option<u32>,
        format: CaptureFormat,
        file: Option<&Path>,
    ) -> Result<Vec<String>> {
        let packets = self.packets()?;
        let to = to.unwrap_or(packets.len() as u32);

        let mut rendered = Vec::new();
        for packet in packets
            .iter()
            .filter(|p| p.id().is_some_and(|id| id >= from && id < to))
        {
            let raw = packet.raw_hex()?;
            rendered.push(match format {
                CaptureFormat::Raw => raw,
                CaptureFormat::Text => hex_dump(&raw),
            });
        }

        if let Some(path) = file {
            fs::write(path, rendered.concat())?;
        }
        Ok(rendered)
    }
}

/// One captured packet.
pub struct XenaCapturePacket {
    core: Arc<SessionCore>,
    target: Target,
}

impl XenaEntity for XenaCapturePacket {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaCapturePacket {
    fn new(core: Arc<SessionCore>, capture_target: &Target, id: u32) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::CapPacket,
                chassis: capture_target.chassis.clone(),
                index: format!("{}/{id}", capture_target.index),
                reference: format!("{}/{id}", capture_target.reference),
            },
        }
    }

    /// Packet bytes as the bare hex string stored on the chassis.
    pub fn raw_hex(&self) -> Result<String> {
        let value = self.get_attribute("pc_packet")?;
        value
            .strip_prefix("0x")
            .map(str::to_string)
            .ok_or_else(|| Error::Parse {
                message: format!("captured packet `{value}` is not 0x-prefixed"),
            })
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.raw_hex()?).map_err(|e| Error::Parse {
            message: format!("bad captured packet hex: {e}"),
        })
    }
}

/// Render a bare hex string as an offset-annotated dump, 16 bytes per
/// line, two hex digits per byte.
fn hex_dump(raw: &str) -> String {
    let mut out = String::new();
    for (i, c) in raw.chars().enumerate() {
        if i % 32 == 0 {
            let _ = write!(out, "\n{:06x} ", i / 2);
        } else if i % 2 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::api::ApiKind;
    use xena_test_utils::ScriptedApi;

    fn capture_with_api() -> (Arc<ScriptedApi>, XenaCapture) {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        let core = Arc::new(SessionCore::new("tester", api.clone()));
        let port_target = Target {
            kind: ObjKind::Port,
            chassis: "10.1.1.1".to_string(),
            index: "3/0".to_string(),
            reference: "tester/10.1.1.1/3/0".to_string(),
        };
        let capture = XenaCapture::new(core, &port_target);
        (api, capture)
    }

    #[test]
    fn packets_follow_the_buffer_count() {
        let (api, capture) = capture_with_api();
        api.stub_return("tester/10.1.1.1/3/0/capture", "pc_stats", "1 2 1234");
        let packets = capture.packets().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].target().index, "3/0/1");
    }

    #[test]
    fn text_format_renders_offsets() {
        let dump = hex_dump("001122334455667788");
        assert!(dump.starts_with("\n000000 00 11 22"));
    }

    #[test]
    fn raw_packets_strip_the_hex_prefix() {
        let (api, capture) = capture_with_api();
        api.stub_return("tester/10.1.1.1/3/0/capture", "pc_stats", "1 1 1234");
        api.stub_attribute("tester/10.1.1.1/3/0/capture/0", "pc_packet", "0xdeadbeef");
        let packets = capture
            .get_packets(0, None, CaptureFormat::Raw, None)
            .unwrap();
        assert_eq!(packets, vec!["deadbeef"]);
    }
}
