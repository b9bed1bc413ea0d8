//! Simulator (A6): scenario-file replay standing in for live radar/video input.
//!
//! Grounded on `simulator.c` / `mec_simulator.h`: one whitespace-separated record per
//! line, replayed at `rel_time_ms / playback_speed` wall time from scenario start, with
//! an optional loop back to the first record. Feeds `Measurement`s straight into the
//! queue, bypassing C3 (radar framing) and the C4 adapters entirely.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::errors::{FusionError, FusionResult};
use crate::metrics::{Event, EventRecorder, SharedMetrics};
use crate::queue::{MessageQueue, QueueMessage};
use crate::track::{Measurement, MeasurementBatch, SensorPosition, TargetType};

#[derive(Debug, Clone, Copy)]
pub struct ScenarioRecord {
    pub rel_time_ms: u64,
    pub sensor_id: u8,
    pub target_id: u32,
    pub target_type: TargetType,
    pub lat: f64,
    pub lon: f64,
    pub velocity: f64,
    pub heading_deg: f64,
    pub confidence: f64,
}

fn type_from_code(code: u32) -> TargetType {
    match code {
        0 => TargetType::Vehicle,
        1 => TargetType::NonVehicle,
        2 => TargetType::Pedestrian,
        3 => TargetType::Obstacle,
        _ => TargetType::Unknown,
    }
}

fn parse_line(line: &str) -> FusionResult<Option<ScenarioRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 9 {
        return Err(FusionError::ProtocolError(format!(
            "expected 9 fields, got {}: {trimmed:?}",
            fields.len()
        )));
    }

    let parse_f = |s: &str| -> FusionResult<f64> {
        s.parse().map_err(|_| FusionError::ProtocolError(format!("bad float field: {s:?}")))
    };
    let parse_u = |s: &str| -> FusionResult<u64> {
        s.parse().map_err(|_| FusionError::ProtocolError(format!("bad integer field: {s:?}")))
    };

    Ok(Some(ScenarioRecord {
        rel_time_ms: parse_u(fields[0])?,
        sensor_id: parse_u(fields[1])? as u8,
        target_id: parse_u(fields[2])? as u32,
        target_type: type_from_code(parse_u(fields[3])? as u32),
        lat: parse_f(fields[4])?,
        lon: parse_f(fields[5])?,
        velocity: parse_f(fields[6])?,
        heading_deg: parse_f(fields[7])?,
        confidence: parse_f(fields[8])?,
    }))
}

pub struct ScenarioPlayer {
    records: Vec<ScenarioRecord>,
}

impl ScenarioPlayer {
    /// Malformed lines are reported and skipped; the rest of the scenario still loads.
    pub fn load(path: &Path) -> FusionResult<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            match parse_line(&line) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("simulator: skipping malformed line {}: {e}", lineno + 1),
            }
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replays the loaded scenario against wall time, pushing one measurement batch per
    /// record directly into `queue`. Runs until `running` clears or (when `looping` is
    /// false) the scenario is exhausted.
    pub fn run(
        &self,
        queue: Arc<MessageQueue>,
        running: Arc<AtomicBool>,
        playback_speed: f64,
        looping: bool,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) {
        if self.records.is_empty() {
            warn!("simulator: scenario has no records, nothing to replay");
            return;
        }

        info!("simulator replay started: {} records, speed {playback_speed}x", self.records.len());
        let mut seq: u64 = 0;

        'replay: loop {
            let scenario_start = Instant::now();
            for record in &self.records {
                if !running.load(Ordering::Acquire) {
                    break 'replay;
                }

                let target_ms = (record.rel_time_ms as f64 / playback_speed.max(0.001)) as u64;
                let target_instant = scenario_start + Duration::from_millis(target_ms);
                let now = Instant::now();
                if target_instant > now {
                    std::thread::sleep(target_instant - now);
                }
                if !running.load(Ordering::Acquire) {
                    break 'replay;
                }

                seq += 1;
                let timestamp = Instant::now();
                let mut batch = MeasurementBatch::with_capacity(1);
                batch.add(Measurement {
                    id: record.target_id,
                    target_type: record.target_type,
                    position: SensorPosition::planar(record.lat, record.lon),
                    velocity_scalar: record.velocity,
                    heading_deg: record.heading_deg,
                    confidence: record.confidence,
                    timestamp,
                    sensor_id: record.sensor_id,
                });

                let msg = QueueMessage {
                    sensor_id: record.sensor_id,
                    timestamp,
                    batch: batch.finish(),
                };

                if let Err(overflow) = queue.push(msg) {
                    metrics.lock().total_overflows += 1;
                    event_recorder.record(Event::QueueOverflow {
                        seq,
                        ts_ns: event_recorder.now_ns(),
                        sensor_id: overflow.msg.sensor_id,
                    });
                }
            }

            if !looping {
                break;
            }
        }

        info!("simulator replay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        let record = parse_line("1500 1 42 0 39.9 116.4 5.0 90.0 0.5").unwrap().unwrap();
        assert_eq!(record.rel_time_ms, 1500);
        assert_eq!(record.sensor_id, 1);
        assert_eq!(record.target_id, 42);
        assert!(matches!(record.target_type, TargetType::Vehicle));
        assert!((record.lat - 39.9).abs() < 1e-9);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        assert!(parse_line("# a comment").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_line("1 2 3").is_err());
    }

    #[test]
    fn unrecognized_type_code_maps_to_unknown() {
        let record = parse_line("0 1 1 9 0 0 0 0 0").unwrap().unwrap();
        assert!(matches!(record.target_type, TargetType::Unknown));
    }
}
