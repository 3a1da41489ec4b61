//! Shared entity behavior: every node in the object tree delegates its
//! protocol calls to the session's backend through [`XenaEntity`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use xena_core::api::XenaApi;
use xena_core::constants::STATE_POLL_PERIOD;
use xena_core::error::{Error, Result};
use xena_core::reference::Target;

/// Per-session state shared by every node: the backend, the owner name,
/// and the test-payload id allocator.
///
/// The allocator is session-local on purpose; two sessions in one
/// process never contaminate each other's id space.
pub struct SessionCore {
    owner: String,
    api: Arc<dyn XenaApi>,
    next_tpld_id: Mutex<u32>,
}

impl SessionCore {
    pub fn new(owner: &str, api: Arc<dyn XenaApi>) -> Self {
        Self {
            owner: owner.to_string(),
            api,
            next_tpld_id: Mutex::new(0),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn api(&self) -> &dyn XenaApi {
        self.api.as_ref()
    }

    /// Hand out a test-payload id. An explicit id wins, and the running
    /// counter always moves past the highest id given out.
    pub fn allocate_tpld_id(&self, explicit: Option<u32>) -> u32 {
        let mut next = self.next_tpld_id.lock();
        let id = explicit.unwrap_or(*next);
        *next = (*next + 1).max(id + 1);
        id
    }

    /// Advance the allocator past ids discovered on the hardware, so
    /// streams added after discovery never collide with loaded ones.
    pub fn advance_tpld_ids(&self, seen: &[u32]) {
        let Some(max_seen) = seen.iter().copied().max() else {
            return;
        };
        let mut next = self.next_tpld_id.lock();
        *next = (*next).max(max_seen) + 1;
    }

    #[cfg(test)]
    pub(crate) fn peek_next_tpld_id(&self) -> u32 {
        *self.next_tpld_id.lock()
    }
}

/// Behavior common to every addressable entity.
pub trait XenaEntity {
    fn core(&self) -> &Arc<SessionCore>;
    fn target(&self) -> &Target;

    /// Human-readable name; defaults to the wire index.
    fn name(&self) -> String {
        self.target().index.clone()
    }

    fn id(&self) -> Option<u32> {
        self.target().id()
    }

    fn send_command(&self, command: &str, args: &[&str]) -> Result<()> {
        self.core().api().send_command(self.target(), command, args)
    }

    fn send_command_return(&self, command: &str, args: &[&str]) -> Result<String> {
        self.core().api().send_command_return(self.target(), command, args)
    }

    fn send_command_return_multilines(&self, command: &str, args: &[&str]) -> Result<Vec<String>> {
        self.core()
            .api()
            .send_command_return_multilines(self.target(), command, args)
    }

    fn get_attribute(&self, attribute: &str) -> Result<String> {
        self.core().api().get_attribute(self.target(), attribute)
    }

    fn get_attributes(&self) -> Result<BTreeMap<String, Option<String>>> {
        self.core().api().get_attributes(self.target())
    }

    fn set_attributes(&self, attributes: &[(&str, &str)]) -> Result<()> {
        self.core().api().set_attributes(self.target(), attributes)
    }

    /// Poll an attribute once per second until it reaches one of the
    /// wanted states (compared case-insensitively) or `timeout` seconds
    /// elapse.
    fn wait_for_states(&self, attribute: &str, timeout: u64, states: &[&str]) -> Result<()> {
        for _ in 0..timeout {
            let value = self.get_attribute(attribute)?;
            if states.iter().any(|s| s.eq_ignore_ascii_case(&value)) {
                return Ok(());
            }
            std::thread::sleep(STATE_POLL_PERIOD);
        }
        let last = self.get_attribute(attribute).unwrap_or_default();
        Err(Error::Timeout {
            attribute: attribute.to_string(),
            states: states.iter().map(|s| s.to_string()).collect(),
            last,
            timeout,
        })
    }

    /// Read one statistics group and zip the counters with its caption
    /// list. A reply shorter than the caption list is a protocol error,
    /// never a silent zero.
    fn read_stat(&self, captions: &[&str], stat_name: &str) -> Result<BTreeMap<String, u64>> {
        let values = self.core().api().get_stats(self.target(), stat_name)?;
        if values.len() < captions.len() {
            return Err(Error::Parse {
                message: format!(
                    "`{stat_name}` returned {} counters, expected {}",
                    values.len(),
                    captions.len()
                ),
            });
        }
        debug!(target = %self.target().reference, stat_name, "read stat group");
        Ok(captions
            .iter()
            .zip(values)
            .map(|(caption, value)| (caption.to_string(), value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xena_core::api::ApiKind;
    use xena_core::reference::ObjKind;
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
    fn allocator_prefers_explicit_ids() {
        let core = SessionCore::new("tester", Arc::new(ScriptedApi::new(ApiKind::Socket)));
        assert_eq!(core.allocate_tpld_id(None), 0);
        assert_eq!(core.allocate_tpld_id(Some(7)), 7);
        assert_eq!(core.allocate_tpld_id(None), 8);
    }

    #[test]
    fn allocator_advances_past_discovered_ids() {
        let core = SessionCore::new("tester", Arc::new(ScriptedApi::new(ApiKind::Socket)));
        core.advance_tpld_ids(&[2, 5, 3]);
        assert_eq!(core.allocate_tpld_id(None), 6);
        core.advance_tpld_ids(&[]);
        assert_eq!(core.allocate_tpld_id(None), 7);
    }

    #[test]
    fn read_stat_zips_captions() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_return("tester/10.1.1.1/3/0", "pr_total", "12 960 100 800");
        let node = port_node(api);
        let stats = node.read_stat(&["bps", "pps", "bytes", "packets"], "pr_total").unwrap();
        assert_eq!(stats["bps"], 12);
        assert_eq!(stats["packets"], 800);
    }

    #[test]
    fn read_stat_rejects_short_replies() {
        let api = Arc::new(ScriptedApi::new(ApiKind::Socket));
        api.stub_return("tester/10.1.1.1/3/0", "pr_total", "12 960");
        let node = port_node(api);
        let err = node
            .read_stat(&["bps", "pps", "bytes", "packets"], "pr_total")
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
