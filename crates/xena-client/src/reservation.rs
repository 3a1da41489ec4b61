//! Reservation state machine shared by chassis, modules and ports.
//!
//! The three resource levels carry the same `<prefix>_reservation` /
//! `<prefix>_reservedby` command pair; only the prefix differs. The
//! client-side checks are advisory: the device remains the authority
//! and its rejections surface as command errors.

use std::str::FromStr;

use tracing::{debug, warn};

use xena_core::error::{Error, Result};

use crate::object::XenaEntity;

/// Reservation state as reported by the chassis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Released,
    ReservedByYou,
    ReservedByOther,
}

impl FromStr for ReservationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "RELEASED" => Ok(ReservationState::Released),
            "RESERVED_BY_YOU" => Ok(ReservationState::ReservedByYou),
            "RESERVED_BY_OTHER" => Ok(ReservationState::ReservedByOther),
            other => Err(Error::Parse {
                message: format!("unknown reservation state `{other}`"),
            }),
        }
    }
}

/// Command prefix of the resource level (`c`, `m` or `p`).
pub(crate) fn reservation_state<E: XenaEntity + ?Sized>(
    entity: &E,
    prefix: &str,
) -> Result<ReservationState> {
    entity
        .get_attribute(&format!("{prefix}_reservation"))?
        .parse()
}

/// Take the reservation. Already holding it is a no-op; a foreign
/// holder fails unless `force`, in which case the holder is relinquished
/// first.
pub(crate) fn reserve<E: XenaEntity + ?Sized>(entity: &E, prefix: &str, force: bool) -> Result<()> {
    let command = format!("{prefix}_reservation");
    match reservation_state(entity, prefix)? {
        ReservationState::ReservedByYou => Ok(()),
        ReservationState::Released => {
            debug!(resource = %entity.target().reference, "reserving");
            entity.send_command(&command, &["reserve"])
        }
        ReservationState::ReservedByOther => {
            let owner = entity.get_attribute(&format!("{prefix}_reservedby"))?;
            if !force {
                return Err(Error::Reservation {
                    resource: entity.target().reference.clone(),
                    owner,
                });
            }
            warn!(resource = %entity.target().reference, %owner, "taking reservation forcefully");
            entity.send_command(&command, &["relinquish"])?;
            entity.send_command(&command, &["reserve"])
        }
    }
}

/// Release our own reservation, if we hold one.
pub(crate) fn release<E: XenaEntity + ?Sized>(entity: &E, prefix: &str) -> Result<()> {
    if reservation_state(entity, prefix)? == ReservationState::ReservedByYou {
        entity.send_command(&format!("{prefix}_reservation"), &["release"])?;
    }
    Ok(())
}

/// Break a foreign reservation, if one exists.
pub(crate) fn relinquish<E: XenaEntity + ?Sized>(entity: &E, prefix: &str) -> Result<()> {
    if reservation_state(entity, prefix)? == ReservationState::ReservedByOther {
        entity.send_command(&format!("{prefix}_reservation"), &["relinquish"])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::SessionCore;
    use std::sync::Arc;
    use xena_core::api::ApiKind;
    use xena_core::reference::{ObjKind, Target};
    use xena_test_utils::ScriptedApi;

    struct Node {
        core: Arc<SessionCore>,
        target: Target,
    }

    impl XenaEntity for Node {
        fn core(&self) -> &Arc<SessionCore> {
            &self.core
        }
        fn target(&self) -> &Target {
            &self.target
        }
    }

    fn port_node(api: Arc<ScriptedApi>) -> Node {
        Node {
            core: Arc::new(SessionCore::new("tester", api)),
            target: Target {
                kind: ObjKind::Port,
                chassis: "10.1.1.1".to_string(),
                index: "3/0".to_string(),
                reference: "tester/10.1.1.1/3/0".to_string(),
            },
        }
    }

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!(
            "released".parse::<ReservationState>().unwrap(),
            ReservationState::Released
        );
        assert_eq!(
            "RESERVED_BY_YOU".parse::<ReservationState>().unwrap(),
            ReservationState::ReservedByYou
        );
        assert!("HALF_RESERVED".parse::<ReservationState>().is_err());
    }

    #[test]
    fn reserve_on_released_port() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RELEASED");
        let node = port_node(Arc::clone(&api));
        reserve(&node, "p", false).unwrap();
        assert!(api.commands().contains(&"3/0 p_reservation reserve".to_string()));
    }

    #[test]
    fn reserve_is_a_noop_when_already_held() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RESERVED_BY_YOU");
        let node = port_node(Arc::clone(&api));
        reserve(&node, "p", true).unwrap();
        reserve(&node, "p", true).unwrap();
        assert!(!api
            .commands()
            .iter()
            .any(|c| c == "3/0 p_reservation reserve"));
    }

    #[test]
    fn conflict_names_the_holder() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RESERVED_BY_OTHER");
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservedby", "intruder");
        let node = port_node(api);
        let err = reserve(&node, "p", false).unwrap_err();
        match err {
            Error::Reservation { owner, .. } => assert_eq!(owner, "intruder"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn force_relinquishes_then_reserves() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RESERVED_BY_OTHER");
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservedby", "intruder");
        let node = port_node(Arc::clone(&api));
        reserve(&node, "p", true).unwrap();
        let commands = api.commands();
        let relinquish_at = commands
            .iter()
            .position(|c| c == "3/0 p_reservation relinquish")
            .unwrap();
        let reserve_at = commands
            .iter()
            .position(|c| c == "3/0 p_reservation reserve")
            .unwrap();
        assert!(relinquish_at < reserve_at);
    }

    #[test]
    fn release_is_a_noop_without_our_reservation() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_attribute("tester/10.1.1.1/3/0", "p_reservation", "RELEASED");
        let node = port_node(Arc::clone(&api));
        release(&node, "p").unwrap();
        assert!(!api.commands().iter().any(|c| c.contains("release")));
    }
}
