//! The session: the root object tying chassis, ports and the backend
//! together under one ownership name.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use xena_core::api::{ChassisAddr, XenaApi};
use xena_core::error::{Error, Result};
use xena_core::reference::{ObjKind, Target};

use crate::chassis::XenaChassis;
use crate::object::{SessionCore, XenaEntity};
use crate::port::XenaPort;

/// A logged-on session over one backend, possibly spanning several
/// chassis. Dropping the session does not release hardware; call
/// [`XenaSession::disconnect`].
pub struct XenaSession {
    core: Arc<SessionCore>,
    target: Target,
    chassis: Mutex<Vec<Arc<XenaChassis>>>,
}

impl XenaEntity for XenaSession {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }

    fn name(&self) -> String {
        self.core.owner().to_string()
    }
}

impl XenaSession {
    /// Connect the backend and take ownership under `owner`.
    pub fn new(api: Arc<dyn XenaApi>, owner: &str) -> Result<Self> {
        api.connect(owner)?;
        info!(owner, kind = ?api.kind(), "session connected");
        let core = Arc::new(SessionCore::new(owner, api));
        let target = Target {
            kind: ObjKind::Session,
            chassis: String::new(),
            index: String::new(),
            reference: owner.to_string(),
        };
        Ok(Self {
            core,
            target,
            chassis: Mutex::new(Vec::new()),
        })
    }

    /// Log on to a chassis and add it to the session. Adding the same
    /// address twice returns the existing chassis.
    pub fn add_chassis(&self, addr: ChassisAddr) -> Result<Arc<XenaChassis>> {
        if let Some(existing) = self.chassis(&addr.ip) {
            return Ok(existing);
        }
        self.core.api().add_chassis(&addr)?;
        let chassis = Arc::new(XenaChassis::new(Arc::clone(&self.core), addr));
        self.chassis.lock().push(Arc::clone(&chassis));
        Ok(chassis)
    }

    /// Release every reserved port and drop the backend connection.
    pub fn disconnect(&self) -> Result<()> {
        self.release_ports()?;
        self.core.api().disconnect()
    }

    /// Read the inventory of every chassis in the session.
    pub fn inventory(&self, modules_inventory: bool) -> Result<()> {
        for chassis in self.chassis_list() {
            chassis.inventory(modules_inventory)?;
        }
        Ok(())
    }

    //
    // Accessors.
    //

    pub fn chassis_list(&self) -> Vec<Arc<XenaChassis>> {
        self.chassis.lock().clone()
    }

    pub fn chassis(&self, ip: &str) -> Option<Arc<XenaChassis>> {
        self.chassis_list()
            .into_iter()
            .find(|c| c.addr().ip == ip)
    }

    /// Every port reserved through this session, across all chassis.
    pub fn ports(&self) -> Vec<Arc<XenaPort>> {
        self.chassis_list()
            .into_iter()
            .flat_map(|c| c.ports())
            .collect()
    }

    //
    // Reservation.
    //

    /// Reserve ports by full `chassis/module/port` location. Each
    /// chassis named must already be in the session.
    pub fn reserve_ports(
        &self,
        locations: &[&str],
        force: bool,
        reset: bool,
    ) -> Result<Vec<Arc<XenaPort>>> {
        let mut reserved = Vec::with_capacity(locations.len());
        for location in locations {
            let (ip, index) = location.split_once('/').ok_or_else(|| Error::Parse {
                message: format!("port location `{location}` is not chassis/module/port"),
            })?;
            let chassis = self
                .chassis(ip)
                .ok_or_else(|| Error::NotConnected(ip.to_string()))?;
            reserved.extend(chassis.reserve_ports(&[index], force, reset)?);
        }
        Ok(reserved)
    }

    pub fn release_ports(&self) -> Result<()> {
        for chassis in self.chassis_list() {
            chassis.release_ports()?;
        }
        Ok(())
    }

    //
    // Traffic and capture, fanned out chassis by chassis.
    //

    /// Start traffic on the given ports (all session ports when empty).
    /// Traffic starts on every chassis before any blocking wait, so
    /// multi-chassis runs overlap.
    pub fn start_traffic(&self, blocking: bool, ports: &[Arc<XenaPort>]) -> Result<()> {
        for (chassis, ports) in self.ports_by_chassis(ports) {
            chassis.start_traffic(false, &ports)?;
        }
        if blocking {
            for (chassis, ports) in self.ports_by_chassis(ports) {
                chassis.wait_traffic(&ports)?;
            }
        }
        Ok(())
    }

    pub fn stop_traffic(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        for (chassis, ports) in self.ports_by_chassis(ports) {
            chassis.stop_traffic(&ports)?;
        }
        Ok(())
    }

    pub fn clear_stats(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        for port in self.operation_ports(ports) {
            port.clear_stats()?;
        }
        Ok(())
    }

    pub fn start_capture(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        for port in self.operation_ports(ports) {
            port.start_capture()?;
        }
        Ok(())
    }

    pub fn stop_capture(&self, ports: &[Arc<XenaPort>]) -> Result<()> {
        for port in self.operation_ports(ports) {
            port.stop_capture()?;
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

    fn ports_by_chassis(
        &self,
        ports: &[Arc<XenaPort>],
    ) -> Vec<(Arc<XenaChassis>, Vec<Arc<XenaPort>>)> {
        let ports = self.operation_ports(ports);
        self.chassis_list()
            .into_iter()
            .filter_map(|chassis| {
                let mine: Vec<Arc<XenaPort>> = ports
                    .iter()
                    .filter(|p| p.target().chassis == chassis.addr().ip)
                    .cloned()
                    .collect();
                if mine.is_empty() {
                    None
                } else {
                    Some((chassis, mine))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::api::ApiKind;
    use xena_test_utils::ScriptedApi;

    fn session_with_api() -> (Arc<ScriptedApi>, XenaSession) {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        let session = XenaSession::new(api.clone(), "tester").unwrap();
        (api, session)
    }

    #[test]
    fn add_chassis_deduplicates_by_address() {
        let (_, session) = session_with_api();
        let first = session.add_chassis(ChassisAddr::new("10.1.1.1")).unwrap();
        let again = session.add_chassis(ChassisAddr::new("10.1.1.1")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(session.chassis_list().len(), 1);
    }

    #[test]
    fn reserve_ports_routes_to_the_named_chassis() {
        let (api, session) = session_with_api();
        session.add_chassis(ChassisAddr::new("10.1.1.1")).unwrap();
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RELEASED");
        let ports = session
            .reserve_ports(&["10.1.1.1/3/0"], false, false)
            .unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name(), "10.1.1.1/3/0");
        assert_eq!(session.ports().len(), 1);
    }

    #[test]
    fn reserve_ports_rejects_unknown_chassis() {
        let (_, session) = session_with_api();
        let err = session
            .reserve_ports(&["10.9.9.9/0/0"], false, false)
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[test]
    fn bad_location_is_a_parse_error() {
        let (_, session) = session_with_api();
        let err = session.reserve_ports(&["nonsense"], false, false).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
