//! Ports: reservation, configuration files, streams, filters, capture
//! and receive-side statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use xena_core::error::{Error, Result};
use xena_core::reference::{ObjKind, Target};

use crate::capture::XenaCapture;
use crate::filter::{XenaFilter, XenaLength, XenaMatch};
use crate::object::{SessionCore, XenaEntity};
use crate::reservation;
use crate::stream::{StreamState, XenaStream};

/// Receive/transmit statistics groups of a port, with their caption
/// lists in wire order.
pub(crate) const PORT_STATS_CAPTIONS: &[(&str, &[&str])] = &[
    (
        "pr_pfcstats",
        &["total", "cos0", "cos1", "cos2", "cos3", "cos4", "cos5", "cos6", "cos7"],
    ),
    ("pr_total", &["bps", "pps", "bytes", "packets"]),
    ("pr_notpld", &["bps", "pps", "bytes", "packets"]),
    (
        "pr_extra",
        &[
            "fcserrors",
            "pauseframes",
            "arprequests",
            "arpreplies",
            "pingrequests",
            "pingreplies",
            "gapcount",
            "gapduration",
        ],
    ),
    ("pt_total", &["bps", "pps", "bytes", "packets"]),
    (
        "pt_extra",
        &[
            "arprequests",
            "arpreplies",
            "pingrequests",
            "pingreplies",
            "injectedfcs",
            "injectedseq",
            "injectedmis",
            "injectedint",
            "injectedtid",
            "training",
        ],
    ),
    ("pt_notpld", &["bps", "pps", "bytes", "packets"]),
];

/// Receive-side statistics groups of one test payload.
pub(crate) const TPLD_STATS_CAPTIONS: &[(&str, &[&str])] = &[
    ("pr_tpldtraffic", &["bps", "pps", "byt", "pac"]),
    ("pr_tplderrors", &["dummy", "seq", "mis", "pld"]),
    (
        "pr_tpldlatency",
        &["min", "avg", "max", "avg1sec", "min1sec", "max1sec"],
    ),
    (
        "pr_tpldjitter",
        &["min", "avg", "max", "avg1sec", "min1sec", "max1sec"],
    ),
];

/// One chassis port and everything configured on it.
pub struct XenaPort {
    core: Arc<SessionCore>,
    target: Target,
    name: String,
    streams: Mutex<Vec<Arc<XenaStream>>>,
    filters: Mutex<Vec<Arc<XenaFilter>>>,
    matches: Mutex<Vec<Arc<XenaMatch>>>,
    lengths: Mutex<Vec<Arc<XenaLength>>>,
    capture: Mutex<Option<Arc<XenaCapture>>>,
}

impl fmt::Debug for XenaPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XenaPort")
            .field("reference", &self.target.reference)
            .finish_non_exhaustive()
    }
}

impl XenaEntity for XenaPort {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl XenaPort {
    /// `chassis_reference` is the owning chassis reference; `index` is
    /// the wire `module/port` pair. The port reference is the module
    /// reference plus the port segment, whether or not the module
    /// object exists locally.
    pub(crate) fn new(
        core: Arc<SessionCore>,
        chassis_ip: &str,
        chassis_reference: &str,
        index: &str,
    ) -> Result<Self> {
        if index.split_once('/').is_none() {
            return Err(Error::Parse {
                message: format!("port index `{index}` is not module/port"),
            });
        }
        let reference = format!("{chassis_reference}/{index}");
        Ok(Self {
            core,
            target: Target {
                kind: ObjKind::Port,
                chassis: chassis_ip.to_string(),
                index: index.to_string(),
                reference,
            },
            name: format!("{chassis_ip}/{index}"),
            streams: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            matches: Mutex::new(Vec::new()),
            lengths: Mutex::new(Vec::new()),
            capture: Mutex::new(None),
        })
    }

    //
    // Reservation and state.
    //

    pub fn reserve(&self, force: bool) -> Result<()> {
        reservation::reserve(self, "p", force)
    }

    pub fn release(&self) -> Result<()> {
        reservation::release(self, "p")
    }

    pub fn relinquish(&self) -> Result<()> {
        reservation::relinquish(self, "p")
    }

    /// Reset the port to factory defaults. Everything configured on it
    /// is gone, so the local children go too.
    pub fn reset(&self) -> Result<()> {
        self.streams.lock().clear();
        self.filters.lock().clear();
        self.matches.lock().clear();
        self.lengths.lock().clear();
        *self.capture.lock() = None;
        self.send_command("p_reset", &[])
    }

    /// Block until the receiver syncs, up to `timeout` seconds.
    pub fn wait_for_up(&self, timeout: u64) -> Result<()> {
        self.wait_for_states("p_receivesync", timeout, &["IN_SYNC"])
    }

    pub fn is_online(&self) -> Result<bool> {
        Ok(self.get_attribute("p_receivesync")? == "IN_SYNC")
    }

    //
    // Configuration files.
    //

    /// Replay a port configuration file (xpc format). Comment lines
    /// start with `;`. Rejected lines are logged and skipped, matching
    /// how the GUI loads partially incompatible files; transport
    /// failures still abort.
    pub fn load_config(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)?;
        info!(port = %self.name, file = %path.display(), "loading port configuration");
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            match self.send_command(line, &[]) {
                Ok(()) => {}
                Err(e) if e.is_request_error() => {
                    warn!(port = %self.name, command = line, error = %e, "config line rejected");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Save the full port configuration as an xpc file.
    pub fn save_config(&self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        self.write_config(&mut file)
    }

    pub(crate) fn write_config<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, ";Port: {}", self.target.index)?;
        writeln!(out, "P_RESET")?;
        for line in self.send_command_return_multilines("p_fullconfig", &["?"])? {
            writeln!(out, "{}", line.trim_start())?;
        }
        Ok(())
    }

    //
    // Streams.
    //

    /// Add a stream. Without an explicit `tpld_id` the session
    /// allocator hands out the next free id.
    pub fn add_stream(
        &self,
        name: Option<&str>,
        tpld_id: Option<u32>,
        state: StreamState,
    ) -> Result<Arc<XenaStream>> {
        let id = self.streams.lock().len() as u32;
        let stream = Arc::new(XenaStream::new(
            Arc::clone(&self.core),
            &self.target,
            id,
            name.map(str::to_string),
        ));
        self.core.api().create(stream.target())?;
        let tpld = self.core.allocate_tpld_id(tpld_id);
        let comment = format!("\"{}\"", stream.name());
        stream.set_attributes(&[
            ("ps_comment", comment.as_str()),
            ("ps_tpldid", tpld.to_string().as_str()),
        ])?;
        stream.set_state(state)?;
        debug!(port = %self.name, stream = id, tpld, "stream added");
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }

    /// Remove a stream by its id.
    pub fn remove_stream(&self, id: u32) -> Result<()> {
        let stream = {
            let streams = self.streams.lock();
            streams
                .iter()
                .find(|s| s.id() == Some(id))
                .cloned()
                .ok_or_else(|| Error::Parse {
                    message: format!("port {} has no stream {id}", self.name),
                })?
        };
        stream.delete()?;
        self.streams.lock().retain(|s| s.id() != Some(id));
        Ok(())
    }

    /// Streams on this port. Populated from the chassis on first
    /// access, advancing the payload-id allocator past loaded ids.
    pub fn streams(&self) -> Result<Vec<Arc<XenaStream>>> {
        if self.streams.lock().is_empty() {
            let indices = self.get_attribute("ps_indices")?;
            let mut discovered = Vec::new();
            let mut tpld_ids = Vec::new();
            for token in indices.split_whitespace() {
                let id: u32 = token.parse().map_err(|_| Error::Parse {
                    message: format!("bad stream index `{token}`"),
                })?;
                let stream = Arc::new(XenaStream::new(
                    Arc::clone(&self.core),
                    &self.target,
                    id,
                    None,
                ));
                let comment = stream.get_attribute("ps_comment")?;
                if !comment.is_empty() {
                    stream.set_name(&comment);
                }
                if let Some(tpld) = stream.tpld_id()? {
                    tpld_ids.push(tpld);
                }
                discovered.push(stream);
            }
            self.core.advance_tpld_ids(&tpld_ids);
            *self.streams.lock() = discovered;
        }
        Ok(self.streams.lock().clone())
    }

    //
    // Filters, matches, lengths.
    //

    pub fn add_filter(&self, comment: Option<&str>) -> Result<Arc<XenaFilter>> {
        let id = self.filters.lock().len() as u32;
        let filter = Arc::new(XenaFilter::new(
            Arc::clone(&self.core),
            &self.target,
            id,
            comment.map(str::to_string),
        ));
        self.core.api().create(filter.target())?;
        let comment = format!("\"{}\"", filter.name());
        filter.set_attributes(&[("pf_comment", comment.as_str())])?;
        self.filters.lock().push(Arc::clone(&filter));
        Ok(filter)
    }

    pub fn remove_filter(&self, id: u32) -> Result<()> {
        let filter = self.find_child(&self.filters, id, "filter")?;
        filter.delete()?;
        self.filters.lock().retain(|f| f.id() != Some(id));
        Ok(())
    }

    pub fn filters(&self) -> Result<Vec<Arc<XenaFilter>>> {
        if self.filters.lock().is_empty() {
            let mut discovered = Vec::new();
            for id in self.indices_of("pf_indices")? {
                let filter = Arc::new(XenaFilter::new(
                    Arc::clone(&self.core),
                    &self.target,
                    id,
                    None,
                ));
                let comment = filter.get_attribute("pf_comment")?;
                if !comment.is_empty() {
                    filter.set_name(&comment);
                }
                discovered.push(filter);
            }
            *self.filters.lock() = discovered;
        }
        Ok(self.filters.lock().clone())
    }

    pub fn add_match(&self) -> Result<Arc<XenaMatch>> {
        let id = self.matches.lock().len() as u32;
        let m = Arc::new(XenaMatch::new(Arc::clone(&self.core), &self.target, id));
        self.core.api().create(m.target())?;
        self.matches.lock().push(Arc::clone(&m));
        Ok(m)
    }

    pub fn remove_match(&self, id: u32) -> Result<()> {
        let m = self.find_child(&self.matches, id, "match")?;
        m.delete()?;
        self.matches.lock().retain(|m| m.id() != Some(id));
        Ok(())
    }

    pub fn matches(&self) -> Result<Vec<Arc<XenaMatch>>> {
        if self.matches.lock().is_empty() {
            let discovered = self
                .indices_of("pm_indices")?
                .into_iter()
                .map(|id| Arc::new(XenaMatch::new(Arc::clone(&self.core), &self.target, id)))
                .collect();
            *self.matches.lock() = discovered;
        }
        Ok(self.matches.lock().clone())
    }

    pub fn add_length(&self) -> Result<Arc<XenaLength>> {
        let id = self.lengths.lock().len() as u32;
        let length = Arc::new(XenaLength::new(Arc::clone(&self.core), &self.target, id));
        self.core.api().create(length.target())?;
        self.lengths.lock().push(Arc::clone(&length));
        Ok(length)
    }

    pub fn remove_length(&self, id: u32) -> Result<()> {
        let length = self.find_child(&self.lengths, id, "length")?;
        length.delete()?;
        self.lengths.lock().retain(|l| l.id() != Some(id));
        Ok(())
    }

    pub fn lengths(&self) -> Result<Vec<Arc<XenaLength>>> {
        if self.lengths.lock().is_empty() {
            let discovered = self
                .indices_of("pl_indices")?
                .into_iter()
                .map(|id| Arc::new(XenaLength::new(Arc::clone(&self.core), &self.target, id)))
                .collect();
            *self.lengths.lock() = discovered;
        }
        Ok(self.lengths.lock().clone())
    }

    //
    // Capture.
    //

    /// Start capture, discarding the previous buffer's packet objects.
    pub fn start_capture(&self) -> Result<()> {
        *self.capture.lock() = None;
        self.send_command("p_capture", &["on"])
    }

    pub fn stop_capture(&self) -> Result<()> {
        self.send_command("p_capture", &["off"])
    }

    pub fn capture(&self) -> Arc<XenaCapture> {
        let mut slot = self.capture.lock();
        let capture = slot
            .get_or_insert_with(|| Arc::new(XenaCapture::new(Arc::clone(&self.core), &self.target)));
        Arc::clone(capture)
    }

    //
    // Statistics.
    //

    pub fn clear_stats(&self) -> Result<()> {
        self.send_command("pt_clear", &[])?;
        self.send_command("pr_clear", &[])
    }

    /// All port-level statistics groups.
    pub fn read_port_stats(&self) -> Result<BTreeMap<String, BTreeMap<String, u64>>> {
        let mut groups = BTreeMap::new();
        for (stat_name, captions) in PORT_STATS_CAPTIONS {
            groups.insert(stat_name.to_string(), self.read_stat(captions, stat_name)?);
        }
        Ok(groups)
    }

    /// Transmit counters per stream on this port.
    pub fn read_stream_stats(&self) -> Result<BTreeMap<String, BTreeMap<String, u64>>> {
        let mut stats = BTreeMap::new();
        for stream in self.streams()? {
            stats.insert(stream.name(), stream.read_stats()?);
        }
        Ok(stats)
    }

    /// Receive counters per test payload currently seen on this port.
    pub fn read_tpld_stats(&self) -> Result<BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>> {
        let mut stats = BTreeMap::new();
        for tpld in self.tplds()? {
            stats.insert(tpld.name(), tpld.read_stats()?);
        }
        Ok(stats)
    }

    /// Test payloads currently received on this port. The live set
    /// changes with traffic, so it is re-read on every call and never
    /// cached.
    pub fn tplds(&self) -> Result<Vec<Arc<XenaTpld>>> {
        let mut tplds = Vec::new();
        for id in self.indices_of("pr_tplds")? {
            tplds.push(Arc::new(XenaTpld::new(
                Arc::clone(&self.core),
                &self.target,
                id,
            )));
        }
        Ok(tplds)
    }

    fn indices_of(&self, attribute: &str) -> Result<Vec<u32>> {
        self.get_attribute(attribute)?
            .split_whitespace()
            .map(|token| {
                token.parse().map_err(|_| Error::Parse {
                    message: format!("bad index `{token}` in `{attribute}` reply"),
                })
            })
            .collect()
    }

    fn find_child<T: XenaEntity>(
        &self,
        slot: &Mutex<Vec<Arc<T>>>,
        id: u32,
        kind: &str,
    ) -> Result<Arc<T>> {
        slot.lock()
            .iter()
            .find(|c| c.id() == Some(id))
            .cloned()
            .ok_or_else(|| Error::Parse {
                message: format!("port {} has no {kind} {id}", self.name),
            })
    }
}

/// One received test payload on a port, identified by its id.
pub struct XenaTpld {
    core: Arc<SessionCore>,
    target: Target,
    /// Port the payload was seen on, for the stream statistics join.
    port_name: String,
}

impl XenaEntity for XenaTpld {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaTpld {
    fn new(core: Arc<SessionCore>, port_target: &Target, id: u32) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::Tpld,
                chassis: port_target.chassis.clone(),
                index: format!("{}/{id}", port_target.index),
                reference: format!("{}/{id}", port_target.reference),
            },
            port_name: format!("{}/{}", port_target.chassis, port_target.index),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// All receive-side statistics groups for this payload.
    pub fn read_stats(&self) -> Result<BTreeMap<String, BTreeMap<String, u64>>> {
        let mut groups = BTreeMap::new();
        for (stat_name, captions) in TPLD_STATS_CAPTIONS {
            groups.insert(stat_name.to_string(), self.read_stat(captions, stat_name)?);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::api::ApiKind;
    use xena_test_utils::ScriptedApi;

    fn port_with_api() -> (Arc<ScriptedApi>, XenaPort) {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        let core = Arc::new(SessionCore::new("tester", api.clone()));
        let port = XenaPort::new(core, "10.1.1.1", "tester/10.1.1.1", "3/0").unwrap();
        (api, port)
    }

    #[test]
    fn reference_extends_the_chassis_reference() {
        let (_, port) = port_with_api();
        assert_eq!(port.target().reference, "tester/10.1.1.1/3/0");
        assert_eq!(port.name(), "10.1.1.1/3/0");
        assert!(format!("{port:?}").contains("tester/10.1.1.1/3/0"));
    }

    #[test]
    fn add_stream_allocates_sequential_tpld_ids() {
        let (api, port) = port_with_api();
        let s0 = port.add_stream(Some("first"), None, StreamState::Enabled).unwrap();
        let s1 = port.add_stream(None, Some(7), StreamState::Disabled).unwrap();
        let s2 = port.add_stream(None, None, StreamState::Enabled).unwrap();
        assert_eq!(s0.id(), Some(0));
        assert_eq!(s1.id(), Some(1));
        assert_eq!(s2.id(), Some(2));
        assert_eq!(api.commands().iter().filter(|c| c.contains("ps_tpldid")).count(), 3);
        assert_eq!(s0.tpld_id().unwrap(), Some(0));
        assert_eq!(s1.tpld_id().unwrap(), Some(7));
        assert_eq!(s2.tpld_id().unwrap(), Some(8));
    }

    #[test]
    fn remove_stream_requires_a_known_id() {
        let (_, port) = port_with_api();
        assert!(port.remove_stream(3).is_err());
    }

    #[test]
    fn stream_discovery_advances_the_allocator() {
        let (api, port) = port_with_api();
        api.stub_attribute("tester/10.1.1.1/3/0", "ps_indices", "0 1");
        api.stub_attribute("tester/10.1.1.1/3/0/0", "ps_comment", "first stream");
        api.stub_attribute("tester/10.1.1.1/3/0/0", "ps_tpldid", "2");
        api.stub_attribute("tester/10.1.1.1/3/0/1", "ps_comment", "");
        api.stub_attribute("tester/10.1.1.1/3/0/1", "ps_tpldid", "5");
        let streams = port.streams().unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].name(), "first stream");
        assert_eq!(streams[1].name(), "3/0/1");
        assert_eq!(port.core().peek_next_tpld_id(), 6);
    }

    #[test]
    fn reset_forgets_children() {
        let (api, port) = port_with_api();
        port.add_stream(None, None, StreamState::Enabled).unwrap();
        port.reset().unwrap();
        api.stub_attribute("tester/10.1.1.1/3/0", "ps_indices", "");
        assert!(port.streams().unwrap().is_empty());
        assert!(api.commands().contains(&"3/0 p_reset".to_string()));
    }

    #[test]
    fn tplds_are_rebuilt_every_read() {
        let (api, port) = port_with_api();
        api.stub_attribute("tester/10.1.1.1/3/0", "pr_tplds", "0 7");
        let first = port.tplds().unwrap();
        assert_eq!(first.len(), 2);
        api.stub_attribute("tester/10.1.1.1/3/0", "pr_tplds", "7");
        let second = port.tplds().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id(), Some(7));
    }

    #[test]
    fn port_stats_cover_every_group() {
        let (api, port) = port_with_api();
        api.stub_return("tester/10.1.1.1/3/0", "pr_pfcstats", "0 0 0 0 0 0 0 0 0");
        api.stub_return("tester/10.1.1.1/3/0", "pr_total", "12 960 100 800");
        api.stub_return("tester/10.1.1.1/3/0", "pr_notpld", "0 0 0 0");
        api.stub_return("tester/10.1.1.1/3/0", "pr_extra", "0 0 0 0 0 0 0 0");
        api.stub_return("tester/10.1.1.1/3/0", "pt_total", "12 960 100 800");
        api.stub_return("tester/10.1.1.1/3/0", "pt_extra", "0 0 0 0 0 0 0 0 0 0");
        api.stub_return("tester/10.1.1.1/3/0", "pt_notpld", "0 0 0 0");
        let stats = port.read_port_stats().unwrap();
        assert_eq!(stats.len(), PORT_STATS_CAPTIONS.len());
        assert_eq!(stats["pr_total"]["packets"], 800);
    }

    #[test]
    fn save_config_resets_before_replay() {
        let (api, port) = port_with_api();
        api.stub_multiline(
            "tester/10.1.1.1/3/0",
            "p_fullconfig",
            &["P_COMMENT \"dut\"", "P_SPEED 10000"],
        );
        let mut out = Vec::new();
        port.write_config(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            ";Port: 3/0\nP_RESET\nP_COMMENT \"dut\"\nP_SPEED 10000\n"
        );
    }
}
