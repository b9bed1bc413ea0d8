//! Fusion processor (C5): gated nearest-neighbor association, Kalman filter, and track
//! lifecycle management.
//!
//! Grounded on `fusion_processor.c`: `fusion_processor_add_tracks` for per-measurement
//! greedy association/birth/drop, `update_fused_track` for confidence smoothing, and
//! `fusion_processing_thread` for the predict-then-cull tick ordering. The single lock
//! guarding the track table reuses this codebase's `parking_lot::Mutex` idiom, applied
//! here to a track array instead of a `Metrics` struct.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{ConfigHandle, FusionConfig};
use crate::errors::{FusionError, FusionResult};
use crate::fusion::kalman::KalmanState;
use crate::metrics::{Event, EventRecorder, SharedMetrics};
use crate::track::{TargetType, TrackBatch};

#[derive(Debug, Clone)]
pub struct FusedTrack {
    pub global_id: u64,
    pub target_type: TargetType,
    pub filter: KalmanState,
    pub confidence: f64,
    pub age_ticks: u32,
    pub sensor_mask: u32,
}

/// A read-only snapshot row, published atomically by the fusion tick. Invariant F2: a
/// track with an uninitialized filter is never represented here — only initialized
/// `FusedTrack`s are ever constructed in the first place.
#[derive(Debug, Clone, Copy)]
pub struct FusedTrackView {
    pub global_id: u64,
    pub target_type: TargetType,
    pub position: (f64, f64),
    pub velocity: f64,
    pub heading_deg: f64,
    pub confidence: f64,
}

struct Inner {
    tracks: Vec<FusedTrack>,
    next_global_id: u64,
}

pub struct FusionProcessor {
    inner: Mutex<Inner>,
    snapshot: Mutex<Arc<[FusedTrackView]>>,
    config: ConfigHandle,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
}

impl FusionProcessor {
    /// Reads thresholds from `config` on every `ingest`/`tick` call, so a SIGHUP reload
    /// (§4A.1) takes effect on the next tick without restarting the fusion processor.
    pub fn new(config: ConfigHandle, metrics: SharedMetrics, event_recorder: Arc<EventRecorder>) -> Self {
        let capacity_hint = config.current().fusion.max_tracks;
        Self {
            inner: Mutex::new(Inner {
                tracks: Vec::with_capacity(capacity_hint),
                next_global_id: 1,
            }),
            snapshot: Mutex::new(Arc::from(Vec::new())),
            config,
            metrics,
            event_recorder,
        }
    }

    /// Associates or births a track for every measurement in `batch`, in order.
    /// Association is greedy per-measurement: each measurement independently picks its
    /// nearest track within the gate, ties broken by first-seen (`position_min_by` keeps
    /// the first minimum on equal distances).
    pub fn ingest(&self, batch: &TrackBatch, sensor_id: u8) -> FusionResult<()> {
        if sensor_id == 0 || sensor_id > 32 {
            return Err(FusionError::InvalidArgument(format!(
                "sensor_id {sensor_id} out of range 1..=32"
            )));
        }
        let cfg = self.config.current().fusion.clone();
        let mut inner = self.inner.lock();

        for m in batch {
            let best = inner
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| (i, t.filter.distance((m.position.x, m.position.y))))
                .filter(|(_, d)| d.is_finite())
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

            match best {
                Some((i, dist)) if dist < cfg.association_threshold => {
                    let track = &mut inner.tracks[i];
                    match track.filter.update((m.position.x, m.position.y), m.timestamp) {
                        Ok(()) => {
                            track.confidence = 0.7 * track.confidence + 0.3 * m.confidence;
                            track.age_ticks = 0;
                            track.sensor_mask |= 1 << (sensor_id - 1);
                            self.event_recorder.record(Event::TrackUpdated {
                                seq: track.global_id,
                                ts_ns: self.event_recorder.now_ns(),
                                global_id: track.global_id,
                            });
                        }
                        Err(FusionError::Numerical(reason)) => {
                            log::warn!("fusion: skipping update for track {}: {reason}", track.global_id);
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ if inner.tracks.len() < cfg.max_tracks => {
                    let global_id = inner.next_global_id;
                    inner.next_global_id += 1;
                    let filter = KalmanState::initialize(m);
                    inner.tracks.push(FusedTrack {
                        global_id,
                        target_type: m.target_type,
                        filter,
                        confidence: m.confidence,
                        age_ticks: 0,
                        sensor_mask: 1 << (sensor_id - 1),
                    });
                    self.event_recorder.record(Event::TrackBorn {
                        seq: global_id,
                        ts_ns: self.event_recorder.now_ns(),
                        global_id,
                    });
                    self.metrics.lock().total_births += 1;
                }
                _ => {
                    log::warn!("fusion: track table full ({} tracks), dropping measurement", cfg.max_tracks);
                }
            }
        }

        self.metrics.lock().active_tracks = inner.tracks.len() as u64;
        Ok(())
    }

    /// One fusion tick: predict every track, age it, cull dead ones, then publish a fresh
    /// snapshot. Predict-then-cull means a track that dies this tick never appears in the
    /// snapshot it would otherwise have polluted.
    pub fn tick(&self, now: Instant) {
        let tick_start = Instant::now();
        let cfg = self.config.current().fusion.clone();
        let mut inner = self.inner.lock();

        let mut i = 0;
        while i < inner.tracks.len() {
            let dt = now.saturating_duration_since(inner.tracks[i].filter.last_update).as_secs_f64();
            inner.tracks[i].filter.predict(dt);
            inner.tracks[i].age_ticks += 1;

            let dead = inner.tracks[i].age_ticks > cfg.max_track_age
                || inner.tracks[i].confidence < cfg.confidence_threshold;

            if dead {
                let dead_track = inner.tracks.swap_remove(i);
                self.event_recorder.record(Event::TrackDied {
                    seq: dead_track.global_id,
                    ts_ns: self.event_recorder.now_ns(),
                    global_id: dead_track.global_id,
                    age_ticks: dead_track.age_ticks,
                });
                self.metrics.lock().total_deaths += 1;
            } else {
                i += 1;
            }
        }

        let views: Vec<FusedTrackView> = inner
            .tracks
            .iter()
            .map(|t| FusedTrackView {
                global_id: t.global_id,
                target_type: t.target_type,
                position: t.filter.position(),
                velocity: t.filter.velocity(),
                heading_deg: t.filter.heading_deg(),
                confidence: t.confidence,
            })
            .collect();

        let latency_us = tick_start.elapsed().as_micros() as u64;
        let mut metrics = self.metrics.lock();
        metrics.active_tracks = inner.tracks.len() as u64;
        crate::metrics::push_capped_u64(&mut metrics.tick_latency_us, latency_us);
        drop(metrics);
        *self.snapshot.lock() = Arc::from(views);
    }

    /// A torn-free snapshot of the currently live tracks, as of the most recent `tick`.
    pub fn get_tracks(&self) -> Arc<[FusedTrackView]> {
        self.snapshot.lock().clone()
    }

    pub fn track_count(&self) -> usize {
        self.inner.lock().tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::new_shared_metrics;
    use crate::track::{Measurement, MeasurementBatch, SensorPosition};
    use std::time::Duration;

    fn handle_for(fusion_cfg: FusionConfig) -> ConfigHandle {
        let mut cfg = crate::config::Config::default();
        cfg.fusion = fusion_cfg;
        ConfigHandle::new(std::path::PathBuf::new(), cfg)
    }

    fn processor() -> FusionProcessor {
        FusionProcessor::new(handle_for(FusionConfig::default()), new_shared_metrics(), Arc::new(EventRecorder::new()))
    }

    fn measurement(x: f64, y: f64, v: f64, heading: f64, ts: Instant) -> Measurement {
        Measurement {
            id: 1,
            target_type: TargetType::Vehicle,
            position: SensorPosition::planar(x, y),
            velocity_scalar: v,
            heading_deg: heading,
            confidence: 0.7,
            timestamp: ts,
            sensor_id: 1,
        }
    }

    fn batch_of(measurements: Vec<Measurement>) -> Arc<TrackBatch> {
        let mut b = MeasurementBatch::with_capacity(measurements.len());
        for m in measurements {
            b.add(m);
        }
        b.finish()
    }

    // S1: birth then update.
    #[test]
    fn birth_then_update() {
        let fp = processor();
        let t0 = Instant::now();
        fp.ingest(&batch_of(vec![measurement(100.0, 100.0, 10.0, 0.0, t0)]), 1).unwrap();
        assert_eq!(fp.track_count(), 1);

        let t1 = t0 + Duration::from_millis(100);
        fp.ingest(&batch_of(vec![measurement(100.5, 100.1, 10.0, 0.0, t1)]), 1).unwrap();
        assert_eq!(fp.track_count(), 1, "second measurement should associate, not birth");
    }

    // S2: a second far-away measurement births a new track.
    #[test]
    fn birth_of_a_new_track() {
        let fp = processor();
        let t0 = Instant::now();
        fp.ingest(&batch_of(vec![measurement(100.0, 100.0, 10.0, 0.0, t0)]), 1).unwrap();
        fp.ingest(&batch_of(vec![measurement(10_000.0, 10_000.0, 0.0, 0.0, t0)]), 1).unwrap();
        assert_eq!(fp.track_count(), 2);
    }

    // S3: aging out with no further measurements.
    #[test]
    fn aging_out() {
        let mut fusion_cfg = FusionConfig::default();
        fusion_cfg.max_track_age = 3;
        let fp = FusionProcessor::new(handle_for(fusion_cfg), new_shared_metrics(), Arc::new(EventRecorder::new()));
        let t0 = Instant::now();
        fp.ingest(&batch_of(vec![measurement(0.0, 0.0, 1.0, 0.0, t0)]), 1).unwrap();
        assert_eq!(fp.track_count(), 1);

        for _ in 0..4 {
            fp.tick(Instant::now());
        }
        assert_eq!(fp.track_count(), 0);
    }

    // F1: monotonically increasing global ids.
    #[test]
    fn global_ids_are_monotonic() {
        let fp = processor();
        let t0 = Instant::now();
        fp.ingest(&batch_of(vec![measurement(0.0, 0.0, 0.0, 0.0, t0)]), 1).unwrap();
        fp.ingest(&batch_of(vec![measurement(5_000.0, 0.0, 0.0, 0.0, t0)]), 1).unwrap();
        fp.ingest(&batch_of(vec![measurement(10_000.0, 0.0, 0.0, 0.0, t0)]), 1).unwrap();
        let tracks = fp.get_tracks_for_test();
        let mut ids: Vec<u64> = tracks.iter().map(|t| t.global_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    // F2: every measurement beyond the gate births (subject to capacity).
    #[test]
    fn gate_respected_forces_birth() {
        let fp = processor();
        let t0 = Instant::now();
        let far_apart = vec![
            measurement(0.0, 0.0, 0.0, 0.0, t0),
            measurement(1_000.0, 0.0, 0.0, 0.0, t0),
            measurement(2_000.0, 0.0, 0.0, 0.0, t0),
        ];
        for m in far_apart {
            fp.ingest(&batch_of(vec![m]), 1).unwrap();
        }
        assert_eq!(fp.track_count(), 3);
    }

    #[test]
    fn capacity_exceeded_drops_measurement() {
        let mut fusion_cfg = FusionConfig::default();
        fusion_cfg.max_tracks = 1;
        let fp = FusionProcessor::new(handle_for(fusion_cfg), new_shared_metrics(), Arc::new(EventRecorder::new()));
        let t0 = Instant::now();
        fp.ingest(&batch_of(vec![measurement(0.0, 0.0, 0.0, 0.0, t0)]), 1).unwrap();
        fp.ingest(&batch_of(vec![measurement(10_000.0, 0.0, 0.0, 0.0, t0)]), 1).unwrap();
        assert_eq!(fp.track_count(), 1, "second birth should have been dropped at capacity");
    }

    #[test]
    fn invalid_sensor_id_is_rejected() {
        let fp = processor();
        let t0 = Instant::now();
        let result = fp.ingest(&batch_of(vec![measurement(0.0, 0.0, 0.0, 0.0, t0)]), 0);
        assert!(matches!(result, Err(FusionError::InvalidArgument(_))));
    }

    impl FusionProcessor {
        fn get_tracks_for_test(&self) -> Vec<FusedTrack> {
            self.inner.lock().tracks.clone()
        }
    }
}
