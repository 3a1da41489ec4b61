//! Raw newline-framed TCP connection to a chassis.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::constants::{ERROR_POINTERS, SOCKET_TIMEOUT};
use crate::error::{Error, Result};

/// Bidirectional byte-stream connection with newline reply framing.
///
/// Any socket-level failure while sending or receiving transitions the
/// connection to disconnected and surfaces as [`Error::Io`]; there is no
/// automatic reconnect. Not safe for concurrent use on its own; see
/// [`super::XenaSocket`].
pub struct LineSocket {
    hostname: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    buffer: BytesMut,
}

impl LineSocket {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self::with_timeout(hostname, port, SOCKET_TIMEOUT)
    }

    pub fn with_timeout(hostname: &str, port: u16, timeout: Duration) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            timeout,
            stream: None,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// `host:port` of the peer.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            warn!(addr = %self.addr(), "connect() on a connected socket");
            return Ok(());
        }
        debug!(addr = %self.addr(), "connecting");

        let addrs: Vec<_> = (self.hostname.as_str(), self.port)
            .to_socket_addrs()?
            .collect();
        let addr = addrs.first().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", self.addr()),
            ))
        })?;

        let stream = TcpStream::connect_timeout(addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        self.buffer.clear();
        self.stream = Some(stream);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.addr(), "disconnecting");
        }
        self.buffer.clear();
    }

    /// Send one command line (newline appended).
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(addr = %self.addr(), %line, "send");
        let addr = self.addr();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::NotConnected(addr))?;

        if let Err(e) = stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
        {
            self.disconnect();
            return Err(e.into());
        }
        Ok(())
    }

    /// Read one reply line.
    ///
    /// A line containing a syntax-error pointer (`---^` / `^---`) flags
    /// the *previous* command; the pointer is discarded and the next
    /// line, carrying the actual error text, is returned instead.
    pub fn read_reply(&mut self) -> Result<String> {
        let line = self.read_line()?;
        if ERROR_POINTERS.iter().any(|p| line.contains(p)) {
            trace!(addr = %self.addr(), "skipping syntax-error pointer line");
            return self.read_line();
        }
        Ok(line)
    }

    /// Send a line and read one reply.
    pub fn send_query(&mut self, line: &str) -> Result<String> {
        self.send_line(line)?;
        self.read_reply()
    }

    fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let raw = self.buffer.split_to(pos + 1);
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                trace!(addr = %self.addr(), %line, "recv");
                return Ok(line);
            }

            let addr = self.addr();
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| Error::NotConnected(addr))?;
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.disconnect();
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "chassis closed the connection",
                    )));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    self.disconnect();
                    return Err(e.into());
                }
            }
        }
    }
}

impl Drop for LineSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Spawn a listener that writes `replies` to the first connection.
    fn canned_server(replies: &'static [u8]) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut conn, _)) = listener.accept() {
                conn.write_all(replies).unwrap();
                // keep the connection open long enough for the reads
                thread::sleep(std::time::Duration::from_millis(200));
            }
        });
        ("127.0.0.1".to_string(), port)
    }

    #[test]
    fn reads_newline_framed_replies() {
        let (host, port) = canned_server(b"<OK>\n3/0 P_SPEED 10000\n");
        let mut sock = LineSocket::new(&host, port);
        sock.connect().unwrap();
        assert_eq!(sock.read_reply().unwrap(), "<OK>");
        assert_eq!(sock.read_reply().unwrap(), "3/0 P_SPEED 10000");
    }

    #[test]
    fn reassembles_split_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"3/0 P_SPE").unwrap();
            conn.flush().unwrap();
            thread::sleep(std::time::Duration::from_millis(50));
            conn.write_all(b"ED 10000\n").unwrap();
            thread::sleep(std::time::Duration::from_millis(100));
        });
        let mut sock = LineSocket::new("127.0.0.1", port);
        sock.connect().unwrap();
        assert_eq!(sock.read_reply().unwrap(), "3/0 P_SPEED 10000");
    }

    #[test]
    fn skips_syntax_error_pointer() {
        let (host, port) = canned_server(b"---^\n#Syntax error in line\n");
        let mut sock = LineSocket::new(&host, port);
        sock.connect().unwrap();
        assert_eq!(sock.read_reply().unwrap(), "#Syntax error in line");
    }

    #[test]
    fn send_on_disconnected_socket_fails() {
        let mut sock = LineSocket::new("127.0.0.1", 1);
        let err = sock.send_line("c_owner ?").unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[test]
    fn peer_close_disconnects() {
        let (host, port) = canned_server(b"");
        let mut sock = LineSocket::new(&host, port);
        sock.connect().unwrap();
        assert!(sock.read_reply().is_err());
        assert!(!sock.is_connected());
    }
}
