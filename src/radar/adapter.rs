//! Radar sensor adapter (C4, radar instance).
//!
//! Periodic producer loop grounded on this codebase's `SpinSleeper`-paced sensor pattern
//! (periodic wakeup, non-blocking overflow accounting, dual event recording), but reading
//! real bytes off a serial port and running them through the C3 frame parser instead of
//! generating a synthetic scalar reading.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::config::RadarConfig;
use crate::errors::{FusionError, FusionResult};
use crate::metrics::{Event, EventRecorder, SharedMetrics};
use crate::queue::{MessageQueue, QueueMessage};
use crate::radar::parser::FrameParser;
use crate::track::{Measurement, MeasurementBatch, SensorPosition, TargetType};

pub const RADAR_SENSOR_ID: u8 = 1;
const POLL_HZ: u64 = 100;

pub struct RadarAdapter {
    config: RadarConfig,
    queue: Arc<MessageQueue>,
    running: Arc<AtomicBool>,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
}

impl RadarAdapter {
    pub fn new(
        config: RadarConfig,
        queue: Arc<MessageQueue>,
        running: Arc<AtomicBool>,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) -> Self {
        Self {
            config,
            queue,
            running,
            metrics,
            event_recorder,
        }
    }

    /// Opens the configured serial device and runs the poll loop until `running` clears
    /// or the port errors out. A failed open is reported but does not bring the process
    /// down (§7: component I/O failure degrades, it does not abort).
    pub fn run(&self) {
        let mut port = match serialport::new(&self.config.device_path, self.config.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
        {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "radar adapter: failed to open {} at {} baud: {e}; adapter not started",
                    self.config.device_path, self.config.baud_rate
                );
                return;
            }
        };

        let mut parser = FrameParser::new();
        let period = Duration::from_millis(1000 / POLL_HZ);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + period;
        let mut seq: u64 = 1;
        let mut buf = [0u8; 256];

        info!("radar adapter started on {}", self.config.device_path);

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            }
            next_deadline += period;

            let n = match port.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => {
                    warn!("radar adapter: serial read error: {e}");
                    0
                }
            };
            if n == 0 {
                continue;
            }

            let discarded_before = parser.discarded_frames();
            let detections = parser.feed(&buf[..n]);
            let newly_discarded = parser.discarded_frames() - discarded_before;
            if newly_discarded > 0 {
                self.event_recorder.record(Event::FrameDiscarded {
                    seq,
                    ts_ns: self.event_recorder.now_ns(),
                    reason: "checksum mismatch".to_string(),
                });
                self.metrics.lock().total_frames_discarded += newly_discarded;
            }
            if detections.is_empty() {
                continue;
            }

            let mut batch = MeasurementBatch::with_capacity(detections.len());
            let timestamp = Instant::now();
            for d in &detections {
                let (x, y) = d.polar_to_cartesian();
                batch.add(Measurement {
                    id: d.target_id as u32,
                    target_type: TargetType::Vehicle,
                    position: SensorPosition::planar(x, y),
                    velocity_scalar: d.velocity,
                    heading_deg: d.heading_deg(),
                    confidence: d.confidence(),
                    timestamp,
                    sensor_id: RADAR_SENSOR_ID,
                });
            }

            let msg = QueueMessage {
                sensor_id: RADAR_SENSOR_ID,
                timestamp,
                batch: batch.finish(),
            };

            if let Err(overflow) = self.queue.push(msg) {
                self.metrics.lock().total_overflows += 1;
                self.event_recorder.record(Event::QueueOverflow {
                    seq,
                    ts_ns: self.event_recorder.now_ns(),
                    sensor_id: RADAR_SENSOR_ID,
                });
                debug!(
                    "radar adapter: queue overflow (capacity {}), dropping batch of {} detections",
                    overflow.capacity,
                    overflow.msg.batch.len()
                );
            }

            seq += 1;
        }

        info!("radar adapter stopped");
    }
}

/// Injects raw bytes as if they had arrived over the wire. Used by tests and by the
/// simulator when it wants to exercise the real parser rather than bypass it; the
/// simulator's default path (A6) feeds `Measurement`s directly and does not use this.
pub fn detections_to_measurements(
    detections: &[crate::radar::parser::RadarDetection],
    timestamp: Instant,
) -> FusionResult<MeasurementBatch> {
    if detections.is_empty() {
        return Err(FusionError::InvalidArgument("empty detection list".to_string()));
    }
    let mut batch = MeasurementBatch::with_capacity(detections.len());
    for d in detections {
        let (x, y) = d.polar_to_cartesian();
        batch.add(Measurement {
            id: d.target_id as u32,
            target_type: TargetType::Vehicle,
            position: SensorPosition::planar(x, y),
            velocity_scalar: d.velocity,
            heading_deg: d.heading_deg(),
            confidence: d.confidence(),
            timestamp,
            sensor_id: RADAR_SENSOR_ID,
        });
    }
    Ok(batch)
}
