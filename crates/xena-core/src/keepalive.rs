//! Background keep-alive for idle chassis connections.
//!
//! The chassis drops connections that stay silent, so each transport
//! gets a timer thread sending a harmless no-op query whenever no real
//! command has gone out within the interval. Probe failures are
//! swallowed; the mechanism is best-effort, not a monitored heartbeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::constants::KEEPALIVE_INTERVAL;
use crate::error::Result;

/// Shared last-activity timestamp.
///
/// Touched by the transport on every real command so the agent only
/// probes genuinely idle connections.
pub struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellable keep-alive timer thread.
///
/// Stopped (signal + join) before the owning connection is torn down so
/// no probe ever races a closed transport.
pub struct KeepAliveAgent {
    stop: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    sent: Arc<AtomicU64>,
}

impl KeepAliveAgent {
    /// Spawn an agent probing with `probe` every `interval` of idleness.
    pub fn spawn<F>(interval: Duration, activity: Arc<Activity>, probe: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        let (stop, stop_rx) = mpsc::channel();
        let sent = Arc::new(AtomicU64::new(0));
        let sent_in_thread = Arc::clone(&sent);

        let handle = std::thread::Builder::new()
            .name("xena-keepalive".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if activity.idle_for() >= interval {
                    if let Err(e) = probe() {
                        debug!(error = %e, "keep-alive probe failed");
                    }
                    sent_in_thread.fetch_add(1, Ordering::Relaxed);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
            sent,
        })
    }

    /// Spawn with the default interval.
    pub fn spawn_default<F>(activity: Arc<Activity>, probe: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        Self::spawn(KEEPALIVE_INTERVAL, activity, probe)
    }

    /// Number of probes sent so far.
    pub fn probes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Signal the loop to exit and join the thread.
    pub fn stop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepAliveAgent {
    fn drop(&mut self) {
        self.stop();
    }
}
