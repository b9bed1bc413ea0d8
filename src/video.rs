//! Video adapter (A7): a mock single-target producer standing in for a real RTSP/vision
//! pipeline, which §1 explicitly excludes from this core's scope.
//!
//! Grounded on `video_processor_mock.c`: one constant-velocity target near a fixed
//! reference coordinate, emitted at 10 Hz, with a small amount of added noise so repeated
//! runs are not bit-identical.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::random_range;
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::config::VideoConfig;
use crate::metrics::{Event, EventRecorder, SharedMetrics};
use crate::queue::{MessageQueue, QueueMessage};
use crate::track::{Measurement, MeasurementBatch, SensorPosition, TargetType};

pub const VIDEO_SENSOR_ID: u8 = 2;
const EMIT_HZ: u64 = 10;

/// Fixed reference point the mock target starts near (matches the C mock's constants).
const REF_LAT: f64 = 39.9087;
const REF_LON: f64 = 116.3975;
const TARGET_SPEED_MPS: f64 = 8.0;
const TARGET_HEADING_DEG: f64 = 45.0;
const VIDEO_CONFIDENCE: f64 = 0.6;

pub struct VideoAdapter {
    _config: VideoConfig,
    queue: Arc<MessageQueue>,
    running: Arc<AtomicBool>,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
}

impl VideoAdapter {
    pub fn new(
        config: VideoConfig,
        queue: Arc<MessageQueue>,
        running: Arc<AtomicBool>,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) -> Self {
        Self {
            _config: config,
            queue,
            running,
            metrics,
            event_recorder,
        }
    }

    pub fn run(&self) {
        let period = Duration::from_millis(1000 / EMIT_HZ);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + period;
        let mut seq: u64 = 1;

        // Planar position in meters relative to the reference coordinate; the mock does
        // not project back to WGS84, matching the core's "positions are a scalar planar
        // pair" non-goal.
        let mut x = 0.0f64;
        let mut y = 0.0f64;
        let heading_rad = TARGET_HEADING_DEG.to_radians();
        let vx = TARGET_SPEED_MPS * heading_rad.cos();
        let vy = TARGET_SPEED_MPS * heading_rad.sin();

        info!("video adapter (mock) started near ({REF_LAT}, {REF_LON})");

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            }
            next_deadline += period;

            let dt = 1.0 / EMIT_HZ as f64;
            x += vx * dt + random_range(-0.05..0.05);
            y += vy * dt + random_range(-0.05..0.05);

            let timestamp = Instant::now();
            let mut batch = MeasurementBatch::with_capacity(1);
            batch.add(Measurement {
                id: 1,
                target_type: TargetType::Vehicle,
                position: SensorPosition::planar(x, y),
                velocity_scalar: TARGET_SPEED_MPS,
                heading_deg: TARGET_HEADING_DEG,
                confidence: VIDEO_CONFIDENCE,
                timestamp,
                sensor_id: VIDEO_SENSOR_ID,
            });

            let msg = QueueMessage {
                sensor_id: VIDEO_SENSOR_ID,
                timestamp,
                batch: batch.finish(),
            };

            if let Err(overflow) = self.queue.push(msg) {
                self.metrics.lock().total_overflows += 1;
                self.event_recorder.record(Event::QueueOverflow {
                    seq,
                    ts_ns: self.event_recorder.now_ns(),
                    sensor_id: VIDEO_SENSOR_ID,
                });
                debug!(
                    "video adapter: queue overflow (capacity {}), dropping mock frame",
                    overflow.capacity
                );
            }

            seq += 1;
        }

        info!("video adapter stopped");
    }
}
