//! Chassis and module entities: logon scope, inventory, traffic
//! fan-out and configuration files.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use xena_core::api::ChassisAddr;
use xena_core::error::{Error, Result};
use xena_core::reference::{ObjKind, Target};

use crate::object::{SessionCore, XenaEntity};
use crate::port::XenaPort;
use crate::reservation;

/// Seconds a traffic start/stop is given to settle on every port.
const TRAFFIC_SETTLE_TIMEOUT: u64 = 40;

/// Seconds to wait for traffic to run dry in a blocking start; long
/// test runs take hours.
const TRAFFIC_DRAIN_TIMEOUT: u64 = 2_628_000;

/// One chassis under a session.
pub struct XenaChassis {
    core: Arc<SessionCore>,
    target: Target,
    addr: ChassisAddr,
    modules: Mutex<Vec<Arc<XenaModule>>>,
    ports: Mutex<Vec<Arc<XenaPort>>>,
    info: Mutex<Option<BTreeMap<String, Option<String>>>>,
}

impl fmt::Debug for XenaChassis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XenaChassis")
            .field("reference", &self.target.reference)
            .finish_non_exhaustive()
    }
}

impl XenaEntity for XenaChassis {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }

    fn name(&self) -> String {
        self.addr.ip.clone()
    }
}

impl XenaChassis {
    pub(crate) fn new(core: Arc<SessionCore>, addr: ChassisAddr) -> Self {
        let target = Target {
            kind: ObjKind::Chassis,
            chassis: addr.ip.clone(),
            index: String::new(),
            reference: format!("{}/{}", core.owner(), addr.ip),
        };
        Self {
            core,
            target,
            addr,
            modules: Mutex::new(Vec::new()),
            ports: Mutex::new(Vec::new()),
            info: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &ChassisAddr {
        &self.addr
    }

    //
    // Reservation.
    //

    pub fn reserve(&self, force: bool) -> Result<()> {
        reservation::reserve(self, "c", force)
    }

    pub fn release(&self) -> Result<()> {
        reservation::release(self, "c")
    }

    pub fn relinquish(&self) -> Result<()> {
        reservation::relinquish(self, "c")
    }

    //
    // Inventory.
    //

    /// Read the chassis inventory: one module per non-zero entry of
    /// `c_portcounts`, each optionally inventoried in turn.
    pub fn inventory(&self, modules_inventory: bool) -> Result<()> {
        let info = self.get_attributes()?;
        let portcounts = info
            .get("c_portcounts")
            .cloned()
            .flatten()
            .ok_or_else(|| Error::Parse {
                message: "chassis attributes missing c_portcounts".to_string(),
            })?;
        let mut modules = Vec::new();
        for (index, count) in portcounts.split_whitespace().enumerate() {
            if count.parse::<u32>().unwrap_or(0) == 0 {
                continue;
            }
            let module = Arc::new(XenaModule::new(
                Arc::clone(&self.core),
                &self.target,
                index as u32,
            ));
            if modules_inventory {
                module.inventory()?;
            }
            modules.push(module);
        }
        info!(chassis = %self.addr.ip, modules = modules.len(), "chassis inventory read");
        *self.modules.lock() = modules;
        *self.info.lock() = Some(info);
        Ok(())
    }

    /// Cached chassis attributes from the last inventory.
    pub fn info(&self) -> Option<BTreeMap<String, Option<String>>> {
        self.info.lock().clone()
    }

    /// Modules on the chassis; triggers an inventory on first access.
    pub fn modules(&self) -> Result<Vec<Arc<XenaModule>>> {
        if self.modules.lock().is_empty() {
            self.inventory(false)?;
        }
        Ok(self.modules.lock().clone())
    }

    /// Ports reserved through this session.
    pub fn ports(&self) -> Vec<Arc<XenaPort>> {
        self.ports.lock().clone()
    }

    //
    // Reservation of ports.
    //

    /// Reserve ports by `module/port` location. Reserved ports join the
    /// session's working set; `reset` restores factory defaults.
    /// Returns the newly reserved ports.
    pub fn reserve_ports(
        &self,
        locations: &[&str],
        force: bool,
        reset: bool,
    ) -> Result<Vec<Arc<XenaPort>>> {
        let mut reserved = Vec::with_capacity(locations.len());
        for location in locations {
            let port = Arc::new(XenaPort::new(
                Arc::clone(&self.core),
                &self.addr.ip,
                &self.target.reference,
                location,
            )?);
            port.reserve(force)?;
            if reset {
                port.reset()?;
            }
            self.ports.lock().push(Arc::clone(&port));
            reserved.push(port);
        }
        Ok(reserved)
    }

    /// Release every port reserved through this session.
    pub fn release_ports(&self) -> Result<()> {
        for port in self.ports() {
            port.release()?;
        }
        Ok(())
    }

    //
    // Traffic.
    //

    /// Start traffic on the given ports (all session ports when empty).
    /// Blocking mode waits for traffic to run dry.
    pub fn start_traffic(&self, blocking: bool, ports: &[Arc<XenaPort>]) -> Result<()> {
        self.traffic_command("on", ports)?;
        if blocking {
            self.wait_traffic(ports)?;
        }
        Ok(())
    }

    pub fn stop_traffic(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        self.traffic_command("off", ports)
    }

    /// Wait until traffic stops by itself on every port.
    pub fn wait_traffic(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        for port in self.operation_ports(ports) {
            port.wait_for_states("p_traffic", TRAFFIC_DRAIN_TIMEOUT, &["off"])?;
        }
        Ok(())
    }

    fn traffic_command(&self, command: &str, ports: &[Arc<XenaPort>]) -> Result<()> {
        let ports = self.operation_ports(ports);
        let mut args: Vec<String> = vec![command.to_string()];
        for port in &ports {
            args.extend(port.target().index.split('/').map(str::to_string));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.send_command("c_traffic", &arg_refs)?;
        for port in &ports {
            port.wait_for_states("p_traffic", TRAFFIC_SETTLE_TIMEOUT, &[command])?;
        }
        Ok(())
    }

    fn operation_ports(&self, ports: &[Arc<XenaPort>]) -> Vec<Arc<XenaPort>> {
        if ports.is_empty() {
            self.ports()
        } else {
            ports.to_vec()
        }
    }

    //
    // Maintenance.
    //

    /// Power the chassis down, or restart it. Taking one chassis down
    /// tears the whole backend session with it; with `wait` the session
    /// reconnects once the chassis is back.
    pub fn shutdown(&self, restart: bool, wait: bool) -> Result<()> {
        let what = if restart { "restart" } else { "shutdown" };
        warn!(chassis = %self.addr.ip, action = what, "shutting chassis down");
        self.send_command("c_down", &["-1480937026", what])?;
        self.core.api().disconnect()?;
        if wait {
            loop {
                std::thread::sleep(Duration::from_secs(2));
                let reconnect = self
                    .core
                    .api()
                    .connect(self.core.owner())
                    .and_then(|()| self.core.api().add_chassis(&self.addr));
                if reconnect.is_ok() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// The chassis-side session id. The underlying `c_stats` command
    /// returns an internal error on current firmware.
    pub fn get_session_id(&self) -> Result<u32> {
        Err(Error::NotImplemented {
            message: "c_stats returns an internal chassis error".to_string(),
        })
    }

    /// Per-session chassis counters. `c_statsession` is broken on
    /// current firmware.
    pub fn read_stats(&self) -> Result<BTreeMap<String, u64>> {
        Err(Error::NotImplemented {
            message: "c_statsession is broken on the chassis".to_string(),
        })
    }

    //
    // Configuration files.
    //

    /// Save the chassis configuration, including every module and its
    /// ports.
    pub fn save_config(&self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, ";Chassis: {}", self.name())?;
        for line in self.send_command_return_multilines("c_config", &["?"])? {
            writeln!(file, "{}", line.trim_start())?;
        }
        for module in self.modules()? {
            module.write_config(&mut file)?;
        }
        Ok(())
    }
}

/// One test module (card) on a chassis.
pub struct XenaModule {
    core: Arc<SessionCore>,
    target: Target,
    ports: Mutex<Vec<Arc<XenaPort>>>,
    info: Mutex<Option<BTreeMap<String, Option<String>>>>,
}

impl XenaEntity for XenaModule {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaModule {
    pub(crate) fn new(core: Arc<SessionCore>, chassis_target: &Target, index: u32) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::Module,
                chassis: chassis_target.chassis.clone(),
                index: index.to_string(),
                reference: format!("{}/{index}", chassis_target.reference),
            },
            ports: Mutex::new(Vec::new()),
            info: Mutex::new(None),
        }
    }

    pub fn reserve(&self, force: bool) -> Result<()> {
        reservation::reserve(self, "m", force)
    }

    pub fn release(&self) -> Result<()> {
        reservation::release(self, "m")
    }

    pub fn relinquish(&self) -> Result<()> {
        reservation::relinquish(self, "m")
    }

    /// Read the module inventory and its ports' attributes. CFP
    /// modules report their port count through the CFP configuration
    /// rather than `m_portcount`.
    pub fn inventory(&self) -> Result<()> {
        let info = self.get_attributes()?;
        let cfp_type = info.get("m_cfptype").cloned().flatten().unwrap_or_default();
        let port_count: u32 = if cfp_type.contains("NOTCFP") || cfp_type.is_empty() {
            parse_count(&self.get_attribute("m_portcount")?)?
        } else {
            let cfp_config = self.get_attribute("m_cfpconfig")?;
            parse_count(cfp_config.split_whitespace().next().unwrap_or(""))?
        };
        let chassis_reference = self
            .target
            .reference
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        let mut ports = Vec::new();
        for p in 0..port_count {
            let port = Arc::new(XenaPort::new(
                Arc::clone(&self.core),
                &self.target.chassis,
                &chassis_reference,
                &format!("{}/{p}", self.target.index),
            )?);
            port.get_attributes()?;
            ports.push(port);
        }
        *self.ports.lock() = ports;
        *self.info.lock() = Some(info);
        Ok(())
    }

    pub fn info(&self) -> Option<BTreeMap<String, Option<String>>> {
        self.info.lock().clone()
    }

    pub fn ports(&self) -> Vec<Arc<XenaPort>> {
        self.ports.lock().clone()
    }

    pub fn save_config(&self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        self.write_config(&mut file)
    }

    pub(crate) fn write_config<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, ";Module: {}", self.target.index)?;
        for line in self.send_command_return_multilines("m_config", &["?"])? {
            writeln!(out, "{}", line.trim_start())?;
        }
        for port in self.ports() {
            port.write_config(out)?;
        }
        Ok(())
    }
}

fn parse_count(token: &str) -> Result<u32> {
    token.trim().parse().map_err(|_| Error::Parse {
        message: format!("bad port count `{token}`"),
    })
}
