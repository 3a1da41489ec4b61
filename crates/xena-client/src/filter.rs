//! Filters, match terms and length terms.
//!
//! A filter combines match/length terms through its condition
//! expression. State cannot be set before a condition exists, so
//! enabling a fresh filter is left to the caller.

use std::sync::Arc;

use parking_lot::Mutex;

use xena_core::error::Result;
use xena_core::reference::{ObjKind, Target};

use crate::object::{SessionCore, XenaEntity};

/// Filter enable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    On,
    Off,
}

impl FilterState {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterState::On => "ON",
            FilterState::Off => "OFF",
        }
    }
}

pub struct XenaFilter {
    core: Arc<SessionCore>,
    target: Target,
    name: Mutex<String>,
}

impl XenaEntity for XenaFilter {
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

impl XenaFilter {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        port_target: &Target,
        id: u32,
        name: Option<String>,
    ) -> Self {
        let index = format!("{}/{id}", port_target.index);
        Self {
            core,
            target: Target {
                kind: ObjKind::Filter,
                chassis: port_target.chassis.clone(),
                index: index.clone(),
                reference: format!("{}/{id}", port_target.reference),
            },
            name: Mutex::new(name.unwrap_or(index)),
        }
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn set_state(&self, state: FilterState) -> Result<()> {
        self.set_attributes(&[("pf_enable", state.as_str())])
    }

    /// Condition expression over the port's match and length terms.
    pub fn set_condition(&self, condition: &str) -> Result<()> {
        self.set_attributes(&[("pf_condition", condition)])
    }

    /// The chassis rejects deleting an enabled filter, so disable
    /// first.
    pub(crate) fn delete(&self) -> Result<()> {
        self.set_state(FilterState::Off)?;
        self.send_command("pf_delete", &[])
    }
}

pub struct XenaMatch {
    core: Arc<SessionCore>,
    target: Target,
}

impl XenaEntity for XenaMatch {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaMatch {
    pub(crate) fn new(core: Arc<SessionCore>, port_target: &Target, id: u32) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::Match,
                chassis: port_target.chassis.clone(),
                index: format!("{}/{id}", port_target.index),
                reference: format!("{}/{id}", port_target.reference),
            },
        }
    }

    pub(crate) fn delete(&self) -> Result<()> {
        self.send_command("pm_delete", &[])
    }
}

pub struct XenaLength {
    core: Arc<SessionCore>,
    target: Target,
}

impl XenaEntity for XenaLength {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn target(&self) -> &Target {
        &self.target
    }
}

impl XenaLength {
    pub(crate) fn new(core: Arc<SessionCore>, port_target: &Target, id: u32) -> Self {
        Self {
            core,
            target: Target {
                kind: ObjKind::Length,
                chassis: port_target.chassis.clone(),
                index: format!("{}/{id}", port_target.index),
                reference: format!("{}/{id}", port_target.reference),
            },
        }
    }

    pub(crate) fn delete(&self) -> Result<()> {
        self.send_command("pl_delete", &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::api::ApiKind;
    use xena_test_utils::ScriptedApi;

    #[test]
    fn filter_delete_disables_first() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        let core = Arc::new(SessionCore::new("tester", api.clone()));
        let port_target = Target {
            kind: ObjKind::Port,
            chassis: "10.1.1.1".to_string(),
            index: "3/0".to_string(),
            reference: "tester/10.1.1.1/3/0".to_string(),
        };
        let filter = XenaFilter::new(core, &port_target, 0, None);
        filter.delete().unwrap();
        assert_eq!(
            api.commands(),
            vec!["3/0 pf_enable [0] OFF", "3/0 pf_delete [0]"]
        );
    }
}
