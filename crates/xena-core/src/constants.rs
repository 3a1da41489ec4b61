//! Protocol and configuration constants for the Xena wire protocol.

use std::time::Duration;

// =============================================================================
// Wire Protocol Constants
// =============================================================================

/// Success marker for commands with no output.
pub const REPLY_OK: &str = "<OK>";

/// End-of-burst sentinel following a `SYNC` command.
pub const REPLY_SYNC: &str = "<SYNC>";

/// The synchronization no-op command used to frame multi-line replies.
pub const SYNC_COMMAND: &str = "SYNC";

/// Reply prefixes the chassis uses to flag a failed command.
pub const REPLY_ERRORS: &[&str] = &[
    "#Syntax error",
    "#Index error",
    "#Internal deparse error",
    "<BADPARAMETER>",
    "<BADINDEX>",
    "<BADPORT>",
    "<NOTRESERVED>",
    "<BADVALUE>",
    "<NOTWRITABLE>",
];

/// Markers rejecting an attribute value on a write.
pub const ATTRIBUTE_ERRORS: &[&str] = &["<BADVALUE>", "<NOTWRITABLE>"];

/// Syntax-error pointer lines; the line after one of these carries the
/// actual error text for the *previous* command.
pub const ERROR_POINTERS: &[&str] = &["---^", "^---"];

// =============================================================================
// Defaults
// =============================================================================

/// Default TCP port of the chassis scripting interface.
pub const DEFAULT_CHASSIS_PORT: u16 = 22611;

/// Default TCP port of the REST server.
pub const DEFAULT_REST_PORT: u16 = 57911;

/// Default chassis password.
pub const DEFAULT_PASSWORD: &str = "xena";

/// Socket connect/read timeout.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between keep-alive probes on an idle connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Poll period used by `wait_for_states`.
pub const STATE_POLL_PERIOD: Duration = Duration::from_secs(1);
