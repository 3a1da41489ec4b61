//! Error types for xena-core.

use thiserror::Error;

/// Main error type for Xena operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted while the transport is disconnected.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// The chassis replied with a recognized error marker.
    #[error("command failed: `{command}` reply `{reply}`")]
    Command { command: String, reply: String },

    /// Unknown attribute name or rejected attribute value.
    ///
    /// Subtype of [`Error::Command`] so callers can branch on "my
    /// addressing was fine but the attribute itself was invalid".
    #[error("attribute error: `{command}` reply `{reply}`")]
    Attribute { command: String, reply: String },

    /// `wait_for_states` exceeded its deadline.
    #[error("{attribute} failed to reach {states:?}, state is {last} after {timeout} seconds")]
    Timeout {
        attribute: String,
        states: Vec<String>,
        last: String,
        timeout: u64,
    },

    /// Resource is reserved by another user and `force` was not given.
    #[error("{resource} is reserved by {owner}")]
    Reservation { resource: String, owner: String },

    /// REST backend received an HTTP status >= 400.
    #[error("REST request failed: status {status}, body `{body}`")]
    Rest { status: u16, body: String },

    /// A reply could not be parsed into the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Operation documented as unsupported (device-side defect).
    #[error("not implemented: {message}")]
    NotImplemented { message: String },
}

impl Error {
    /// Returns true if this error indicates an infrastructure problem
    /// (connectivity, framing, deadline) rather than a bad request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::NotConnected(_) | Error::Timeout { .. } | Error::Parse { .. }
        )
    }

    /// Returns true if the request itself was invalid and retrying
    /// without changing it cannot succeed.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Error::Command { .. }
                | Error::Attribute { .. }
                | Error::Reservation { .. }
                | Error::Rest { .. }
        )
    }
}

/// Convenience result type for Xena operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_command() {
        let err = Error::Command {
            command: "3/0 P_RESET".into(),
            reply: "<NOTRESERVED>".into(),
        };
        assert_eq!(
            err.to_string(),
            "command failed: `3/0 P_RESET` reply `<NOTRESERVED>`"
        );
    }

    #[test]
    fn error_display_reservation() {
        let err = Error::Reservation {
            resource: "port 3/0".into(),
            owner: "olga".into(),
        };
        assert_eq!(err.to_string(), "port 3/0 is reserved by olga");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn infrastructure_classification() {
        assert!(Error::NotConnected("10.0.0.1:22611".into()).is_infrastructure());
        assert!(Error::Timeout {
            attribute: "p_traffic".into(),
            states: vec!["off".into()],
            last: "on".into(),
            timeout: 40,
        }
        .is_infrastructure());

        assert!(!Error::Attribute {
            command: "3/0 P_SPEED 17".into(),
            reply: "<BADVALUE>".into(),
        }
        .is_infrastructure());
    }

    #[test]
    fn request_error_classification() {
        assert!(Error::Rest {
            status: 404,
            body: "no such object".into(),
        }
        .is_request_error());
        assert!(Error::Attribute {
            command: "3/0 P_BOGUS ?".into(),
            reply: "#Syntax error".into(),
        }
        .is_request_error());

        assert!(!Error::Io(std::io::Error::other("boom")).is_request_error());
    }
}
