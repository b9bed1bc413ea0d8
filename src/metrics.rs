//! Metrics collection and event recording.
//!
//! Two independent paths, mirroring the dashboard/export split used elsewhere in this
//! codebase:
//! - **EventRecorder:** lock-free queue -> background CSV export (nanosecond precision).
//! - **SharedMetrics:** mutex-guarded buffer for the monitor service to read without
//!   touching the fusion processor's lock.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use log::error;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub enum Event {
    MeasurementIngested {
        seq: u64,
        ts_ns: u64,
        sensor_id: u8,
        associated: bool,
    },
    TrackBorn {
        seq: u64,
        ts_ns: u64,
        global_id: u64,
    },
    TrackUpdated {
        seq: u64,
        ts_ns: u64,
        global_id: u64,
    },
    TrackDied {
        seq: u64,
        ts_ns: u64,
        global_id: u64,
        age_ticks: u32,
    },
    QueueOverflow {
        seq: u64,
        ts_ns: u64,
        sensor_id: u8,
    },
    FrameDiscarded {
        seq: u64,
        ts_ns: u64,
        reason: String,
    },
    RsmEncoded {
        seq: u64,
        ts_ns: u64,
        track_count: usize,
        bytes: usize,
    },
}

impl Event {
    /// CSV row: seq,component,event,ts_ns,field1,field2,field3
    pub fn to_csv_row(&self) -> String {
        match self {
            Event::MeasurementIngested { seq, ts_ns, sensor_id, associated } => {
                format!("{},sensor,MeasurementIngested,{},{},{},", seq, ts_ns, sensor_id, associated)
            }
            Event::TrackBorn { seq, ts_ns, global_id } => {
                format!("{},fusion,TrackBorn,{},{},,", seq, ts_ns, global_id)
            }
            Event::TrackUpdated { seq, ts_ns, global_id } => {
                format!("{},fusion,TrackUpdated,{},{},,", seq, ts_ns, global_id)
            }
            Event::TrackDied { seq, ts_ns, global_id, age_ticks } => {
                format!("{},fusion,TrackDied,{},{},{},", seq, ts_ns, global_id, age_ticks)
            }
            Event::QueueOverflow { seq, ts_ns, sensor_id } => {
                format!("{},queue,QueueOverflow,{},{},,", seq, ts_ns, sensor_id)
            }
            Event::FrameDiscarded { seq, ts_ns, reason } => {
                format!("{},radar,FrameDiscarded,{},{},,", seq, ts_ns, reason)
            }
            Event::RsmEncoded { seq, ts_ns, track_count, bytes } => {
                format!("{},v2x,RsmEncoded,{},{},{},", seq, ts_ns, track_count, bytes)
            }
        }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;

/// Non-blocking event recorder with background CSV export. Drops silently when full: a
/// stalled writer must never back up producer threads.
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Event>>,
    run_start: Instant,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        let _ = self.queue.push(event);
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    /// Spawns a background thread draining the queue into `output_csv`. Exits once the
    /// queue has been empty for two consecutive polls.
    pub fn start_exporter(&self, output_csv: String) -> thread::JoinHandle<()> {
        let queue = self.queue.clone();

        thread::spawn(move || match File::create(&output_csv) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                let _ = writeln!(writer, "seq,component,event,ts_ns,field1,field2,field3");

                loop {
                    match queue.pop() {
                        Some(event) => {
                            let _ = writeln!(writer, "{}", event.to_csv_row());
                        }
                        None => {
                            thread::sleep(Duration::from_millis(50));
                            if queue.is_empty() {
                                break;
                            }
                        }
                    }
                }
                let _ = writer.flush();
            }
            Err(e) => error!("failed to create event csv {:?}: {}", output_csv, e),
        })
    }
}

impl Clone for EventRecorder {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            run_start: self.run_start,
        }
    }
}

pub const MAX_POINTS: usize = 1_000;

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Live counters the monitor service and coordinator read without touching the fusion
/// processor's own lock.
#[derive(Default)]
pub struct Metrics {
    pub queue_depth_history: VecDeque<u64>,
    pub tick_latency_us: VecDeque<u64>,
    pub ingest_latency_us: VecDeque<u64>,
    pub active_tracks: u64,
    pub total_births: u64,
    pub total_deaths: u64,
    pub total_overflows: u64,
    pub total_frames_discarded: u64,
    pub total_rsm_encoded: u64,
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(Metrics::default()))
}
