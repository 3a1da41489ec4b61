//! Reply classification for the line-oriented chassis protocol.
//!
//! Replies carry no correlation IDs; a line is either the `<OK>` success
//! marker, a line starting with one of the fixed error markers, or data.

use crate::constants::{ATTRIBUTE_ERRORS, REPLY_ERRORS, REPLY_OK, REPLY_SYNC};
use crate::error::{Error, Result};

/// Classification of a single reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The literal `<OK>` success marker.
    Ok,
    /// The literal `<SYNC>` end-of-burst sentinel.
    Sync,
    /// A line starting with one of the fixed error markers.
    Error,
    /// Anything else; carries data for the caller.
    Data,
}

/// Classify a single reply line.
pub fn classify(line: &str) -> Reply {
    let line = line.trim_end();
    if line == REPLY_OK {
        Reply::Ok
    } else if line.starts_with(REPLY_SYNC) {
        Reply::Sync
    } else if is_error(line) {
        Reply::Error
    } else {
        Reply::Data
    }
}

/// Whether the line starts with one of the fixed error markers.
pub fn is_error(line: &str) -> bool {
    REPLY_ERRORS.iter().any(|e| line.starts_with(e))
}

/// Whether the reply rejects an attribute value on a write.
pub fn is_attribute_error(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    ATTRIBUTE_ERRORS
        .iter()
        .any(|e| lower.contains(&e.to_lowercase()))
}

/// Whether the reply flags an unknown attribute name. The device
/// answers a read of an attribute it does not know with a syntax
/// error.
pub fn is_unknown_attribute(reply: &str) -> bool {
    reply.to_lowercase().contains("#syntax error")
}

/// Turn a command/reply pair into [`Error::Command`].
///
/// Context decides whether a failure is an attribute problem, so the
/// attribute read/write paths re-classify afterwards; see
/// [`read_attribute_error`] and [`write_attribute_error`].
pub fn command_error(command: &str, reply: &str) -> Error {
    Error::Command {
        command: command.to_string(),
        reply: reply.to_string(),
    }
}

/// Re-classify a command failure from an attribute read.
pub fn read_attribute_error(err: Error) -> Error {
    match err {
        Error::Command { command, reply } if is_unknown_attribute(&reply) => {
            Error::Attribute { command, reply }
        }
        other => other,
    }
}

/// Re-classify a command failure from an attribute write.
pub fn write_attribute_error(err: Error) -> Error {
    match err {
        Error::Command { command, reply } if is_attribute_error(&reply) => {
            Error::Attribute { command, reply }
        }
        other => other,
    }
}

/// Check a verify-style reply: anything but `<OK>` is a failure.
pub fn verify_ok(command: &str, reply: &str) -> Result<()> {
    if reply.trim_end() == REPLY_OK {
        Ok(())
    } else {
        Err(command_error(command, reply.trim_end()))
    }
}

/// Check a data-carrying reply for error markers.
pub fn verify_data(command: &str, reply: &str) -> Result<()> {
    if is_error(reply.trim_end()) {
        Err(command_error(command, reply.trim_end()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_markers() {
        assert_eq!(classify("<OK>"), Reply::Ok);
        assert_eq!(classify("<OK>\n"), Reply::Ok);
        assert_eq!(classify("<SYNC>"), Reply::Sync);
        assert_eq!(classify("#Syntax error in line"), Reply::Error);
        assert_eq!(classify("<NOTRESERVED>"), Reply::Error);
        assert_eq!(classify("3/0 P_SPEED 10000"), Reply::Data);
    }

    #[test]
    fn all_error_prefixes_recognized() {
        for marker in crate::constants::REPLY_ERRORS {
            assert!(is_error(marker), "{marker} not classified as error");
        }
    }

    #[test]
    fn command_errors_stay_generic_without_context() {
        assert!(matches!(
            command_error("3/0 p_reset", "#Syntax error in line \"3/0 p_reset\""),
            Error::Command { .. }
        ));
        assert!(matches!(
            command_error("3/0 P_SPEED 17", "<BADVALUE>"),
            Error::Command { .. }
        ));
    }

    #[test]
    fn attribute_reads_promote_syntax_errors() {
        let err = read_attribute_error(command_error(
            "3/0 p_bogus ?",
            "#Syntax error in line \"3/0 p_bogus ?\"",
        ));
        assert!(matches!(err, Error::Attribute { .. }));

        // value markers stay generic on the read side
        let err = read_attribute_error(command_error("3/0 p_speed ?", "<BADVALUE>"));
        assert!(matches!(err, Error::Command { .. }));
    }

    #[test]
    fn attribute_writes_promote_value_markers() {
        assert!(is_attribute_error("<BADVALUE>"));
        assert!(is_attribute_error("<NOTWRITABLE>"));
        assert!(!is_attribute_error("<NOTRESERVED>"));

        let err = write_attribute_error(command_error("3/0 P_SPEED 17", "<BADVALUE>"));
        assert!(matches!(err, Error::Attribute { .. }));

        let err = write_attribute_error(command_error("3/0 P_RESET", "<NOTRESERVED>"));
        assert!(matches!(err, Error::Command { .. }));
    }

    #[test]
    fn verify_ok_accepts_only_ok() {
        assert!(verify_ok("3/0 P_RESET", "<OK>").is_ok());
        assert!(verify_ok("3/0 P_RESET", "<OK>\n").is_ok());
        let err = verify_ok("3/0 P_RESET", "<NOTRESERVED>").unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        // data where <OK> was expected is also a failure
        assert!(verify_ok("3/0 P_RESET", "3/0 P_RESET").is_err());
    }
}
