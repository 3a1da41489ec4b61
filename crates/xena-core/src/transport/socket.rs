//! Serialized command/reply access to one chassis connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::constants::SYNC_COMMAND;
use crate::error::Result;
use crate::keepalive::Activity;
use crate::protocol::{self, Reply};
use crate::transport::LineSocket;

/// One chassis connection plus the one-slot mutual-exclusion lock.
///
/// Replies are positionally correlated to requests, so only one command
/// may be in flight; the lock is held for the entire round trip,
/// including sentinel collection for multi-line queries.
pub struct XenaSocket {
    inner: Mutex<LineSocket>,
    activity: Arc<Activity>,
}

impl XenaSocket {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            inner: Mutex::new(LineSocket::new(hostname, port)),
            activity: Arc::new(Activity::new()),
        }
    }

    pub fn with_timeout(hostname: &str, port: u16, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(LineSocket::with_timeout(hostname, port, timeout)),
            activity: Arc::new(Activity::new()),
        }
    }

    /// Last-activity tracker shared with the keep-alive agent.
    pub fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }

    pub fn addr(&self) -> String {
        self.inner.lock().addr()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().is_connected()
    }

    pub fn connect(&self) -> Result<()> {
        let mut sock = self.inner.lock();
        sock.connect()?;
        debug!(addr = %sock.addr(), "connected");
        Ok(())
    }

    pub fn disconnect(&self) {
        self.inner.lock().disconnect();
    }

    /// Send a command with no output and verify the `<OK>` marker.
    pub fn send_command(&self, command: &str) -> Result<()> {
        let mut sock = self.inner.lock();
        self.activity.touch();
        let reply = sock.send_query(command)?;
        protocol::verify_ok(command, &reply)
    }

    /// Send a command and return its single data line.
    pub fn send_query(&self, command: &str) -> Result<String> {
        let mut sock = self.inner.lock();
        self.activity.touch();
        let reply = sock.send_query(command)?;
        protocol::verify_data(command, &reply)?;
        Ok(reply)
    }

    /// Send a command followed by the `SYNC` no-op and collect data
    /// lines until the `<SYNC>` sentinel.
    ///
    /// The device emits an a-priori-unknown number of lines per
    /// multi-parameter query, so end-of-burst is detected by the
    /// sentinel rather than a line count. An error line aborts the
    /// whole read.
    pub fn send_query_multilines(&self, command: &str) -> Result<Vec<String>> {
        let mut sock = self.inner.lock();
        self.activity.touch();
        sock.send_line(command)?;
        sock.send_line(SYNC_COMMAND)?;

        let mut lines = Vec::new();
        loop {
            let reply = sock.read_reply()?;
            match protocol::classify(&reply) {
                Reply::Sync => return Ok(lines),
                Reply::Error => return Err(protocol::command_error(command, &reply)),
                Reply::Ok | Reply::Data => lines.push(reply),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Minimal scripted peer: replies to each received line from a queue.
    fn scripted_server(script: Vec<(&'static str, Vec<&'static str>)>) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            let mut writer = conn.try_clone().unwrap();
            let reader = BufReader::new(conn);
            let mut script = script.into_iter();
            for line in reader.lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break,
                };
                if line == "SYNC" {
                    writer.write_all(b"<SYNC>\n").unwrap();
                    continue;
                }
                let (expected, replies) = match script.next() {
                    Some(s) => s,
                    None => break,
                };
                assert_eq!(line, expected);
                for reply in replies {
                    writer.write_all(reply.as_bytes()).unwrap();
                    writer.write_all(b"\n").unwrap();
                }
            }
        });
        ("127.0.0.1".to_string(), port)
    }

    #[test]
    fn send_command_verifies_ok() {
        let (host, port) = scripted_server(vec![
            ("3/0 p_reset", vec!["<OK>"]),
            ("3/0 p_capture on", vec!["<NOTRESERVED>"]),
        ]);
        let sock = XenaSocket::new(&host, port);
        sock.connect().unwrap();
        sock.send_command("3/0 p_reset").unwrap();
        let err = sock.send_command("3/0 p_capture on").unwrap_err();
        assert!(matches!(err, crate::Error::Command { .. }));
    }

    #[test]
    fn multiline_terminates_on_sentinel() {
        let (host, port) = scripted_server(vec![(
            "3/0 p_config ?",
            vec!["3/0 P_SPEED 10000", "3/0 P_COMMENT \"dut\""],
        )]);
        let sock = XenaSocket::new(&host, port);
        sock.connect().unwrap();
        let lines = sock.send_query_multilines("3/0 p_config ?").unwrap();
        assert_eq!(lines, vec!["3/0 P_SPEED 10000", "3/0 P_COMMENT \"dut\""]);
    }

    #[test]
    fn multiline_aborts_on_error_line() {
        let (host, port) = scripted_server(vec![(
            "3/0 p_bogus ?",
            vec!["#Syntax error in line \"3/0 p_bogus ?\""],
        )]);
        let sock = XenaSocket::new(&host, port);
        sock.connect().unwrap();
        let err = sock.send_query_multilines("3/0 p_bogus ?").unwrap_err();
        assert!(matches!(err, crate::Error::Command { .. }));
    }

    #[test]
    fn empty_burst_yields_no_lines() {
        let (host, port) = scripted_server(vec![("3/0 ps_config ?", vec![])]);
        let sock = XenaSocket::new(&host, port);
        sock.connect().unwrap();
        let lines = sock.send_query_multilines("3/0 ps_config ?").unwrap();
        assert!(lines.is_empty());
    }
}
