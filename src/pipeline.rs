//! Pipeline coordinator (C7): owns the queue and fusion processor, drives the consumer
//! loop (pop -> ingest -> release -> snapshot -> encode), and runs the fusion tick on its
//! own schedule.
//!
//! Grounded on the original `main.c` consumer loop (500 ms pop timeout, 5 s heartbeat,
//! sim-mode direct pull), with thread spawn/join ordering following this codebase's own
//! convention of a shared `running: Arc<AtomicBool>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::fusion::FusionProcessor;
use crate::metrics::{Event, EventRecorder, SharedMetrics};
use crate::queue::{MessageQueue, PopOutcome};
use crate::v2x;

const POP_TIMEOUT_MS: i64 = 500;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const FUSION_TICK_HZ: u64 = 20;

pub struct Coordinator {
    pub queue: Arc<MessageQueue>,
    pub fusion: Arc<FusionProcessor>,
    pub running: Arc<AtomicBool>,
    pub config: ConfigHandle,
    pub metrics: SharedMetrics,
    pub event_recorder: Arc<EventRecorder>,
    pub rsu_id: u32,
}

impl Coordinator {
    /// Spawns the 20 Hz fusion tick thread. The thread exits once `running` clears.
    pub fn spawn_fusion_tick(&self) -> std::thread::JoinHandle<()> {
        let fusion = self.fusion.clone();
        let running = self.running.clone();
        std::thread::spawn(move || {
            let period = Duration::from_millis(1000 / FUSION_TICK_HZ);
            let mut next_deadline = Instant::now() + period;
            info!("fusion tick thread started ({FUSION_TICK_HZ} Hz)");
            while running.load(Ordering::Acquire) {
                let now = Instant::now();
                if now < next_deadline {
                    std::thread::sleep(next_deadline - now);
                }
                next_deadline += period;
                fusion.tick(Instant::now());
            }
            info!("fusion tick thread stopped");
        })
    }

    /// Runs the consumer loop on the calling thread until `running` clears.
    pub fn run_consumer_loop(&self) {
        let mut seq: u64 = 0;
        let mut last_heartbeat = Instant::now();
        let mut buf = vec![0u8; 4096];

        info!("coordinator consumer loop started");

        while self.running.load(Ordering::Acquire) {
            let t_start = Instant::now();
            match self.queue.pop(POP_TIMEOUT_MS) {
                PopOutcome::Message(msg) => {
                    seq += 1;
                    let sensor_id = msg.sensor_id;
                    match self.fusion.ingest(&msg.batch, sensor_id) {
                        Ok(()) => {
                            self.event_recorder.record(Event::MeasurementIngested {
                                seq,
                                ts_ns: self.event_recorder.now_ns(),
                                sensor_id,
                                associated: true,
                            });
                        }
                        Err(e) => warn!("fusion ingest failed: {e}"),
                    }
                    // msg.batch is dropped here, releasing the consumer-side reference
                    // (invariant Q2: every successful pop balanced by one release).
                    drop(msg);

                    let latency_us = t_start.elapsed().as_micros() as u64;
                    crate::metrics::push_capped_u64(&mut self.metrics.lock().ingest_latency_us, latency_us);

                    let snapshot = self.fusion.get_tracks();
                    if !snapshot.is_empty() {
                        self.encode_and_log(seq, &snapshot, &mut buf);
                    }
                }
                PopOutcome::TimedOut => {
                    if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                        last_heartbeat = Instant::now();
                        let queue_depth = self.queue.size() as u64;
                        crate::metrics::push_capped_u64(&mut self.metrics.lock().queue_depth_history, queue_depth);
                        debug!(
                            "heartbeat: {} active tracks, queue depth {}",
                            self.fusion.track_count(),
                            queue_depth
                        );
                    }
                }
            }
        }

        info!("coordinator consumer loop stopped");
    }

    fn encode_and_log(&self, seq: u64, snapshot: &[crate::fusion::FusedTrackView], buf: &mut [u8]) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        match v2x::encode_rsm(snapshot, self.rsu_id, timestamp_ms, buf) {
            Ok(n) => {
                self.metrics.lock().total_rsm_encoded += 1;
                self.event_recorder.record(Event::RsmEncoded {
                    seq,
                    ts_ns: self.event_recorder.now_ns(),
                    track_count: snapshot.len(),
                    bytes: n,
                });
            }
            Err(e) => warn!("rsm encode failed: {e}"),
        }
    }

    /// Idempotent shutdown signal: sets `running` false and wakes the queue's blocked
    /// waiters so a consumer stuck in `pop` reaches its next check promptly.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}
