//! Monitor service (A5): a Unix-domain-socket status endpoint.
//!
//! Grounded on `monitor.c`'s `select()`-timeout accept loop and JSON literal shape.
//! Rust's blocking `UnixListener` doesn't need `select()` to cooperate with shutdown — a
//! read timeout on the listener (`set_nonblocking` + a short poll) gets the same
//! behavior without an extra multiplexing syscall.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;

use crate::metrics::SharedMetrics;

#[derive(Serialize)]
struct StatusReply {
    status: &'static str,
    tracks: u64,
    uptime_s: u64,
}

pub struct MonitorService {
    socket_path: String,
    running: Arc<AtomicBool>,
    metrics: SharedMetrics,
    start: Instant,
}

impl MonitorService {
    pub fn new(socket_path: String, running: Arc<AtomicBool>, metrics: SharedMetrics) -> Self {
        Self {
            socket_path,
            running,
            metrics,
            start: Instant::now(),
        }
    }

    /// Binds and accepts connections until `running` clears. A bind failure is logged
    /// and the service simply does not start — the monitor is optional per §7.
    pub fn run(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let listener = match UnixListener::bind(&self.socket_path) {
            Ok(l) => l,
            Err(e) => {
                warn!("monitor: failed to bind {}: {e}; monitor not started", self.socket_path);
                return;
            }
        };
        if let Err(e) = listener.set_nonblocking(true) {
            warn!("monitor: failed to set non-blocking: {e}; monitor not started");
            return;
        }

        info!("monitor service listening on {}", self.socket_path);

        while self.running.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, _addr)) => self.handle_connection(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => {
                    warn!("monitor: accept error: {e}");
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("monitor service stopped");
    }

    fn handle_connection(&self, mut stream: UnixStream) {
        let reply = StatusReply {
            status: "running",
            tracks: self.metrics.lock().active_tracks,
            uptime_s: self.start.elapsed().as_secs(),
        };
        match serde_json::to_vec(&reply) {
            Ok(body) => {
                let _ = stream.write_all(&body);
            }
            Err(e) => warn!("monitor: failed to serialize status: {e}"),
        }
    }
}
