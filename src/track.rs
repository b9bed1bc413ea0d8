//! Track container (C1): reference-counted, append-only measurement batches.
//!
//! The original routes a batch handle through the queue while the producer still holds a
//! handle to the same storage. Here the producer instead builds a `MeasurementBatch`
//! locally, mutates it freely (it is the sole writer, invariant M1), and `finish()`es it
//! into an immutable `Arc<TrackBatch>` before handing it to the queue. Retain/release
//! become `Arc::clone`/`Drop` — the only shared-mutable field the original's contract
//! names (the reference count) is exactly what `Arc` already gives us for free.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Vehicle,
    NonVehicle,
    Pedestrian,
    Obstacle,
    Unknown,
}

impl TargetType {
    /// Maps to the V2X RSM wire encoding (§4.6): 0 unknown, 1 small vehicle, 2 large
    /// vehicle, 3 pedestrian, 4 non-motor. `Obstacle` has no RSM-side representation and
    /// collapses to unknown, matching the wire format's 0..4 range.
    pub fn rsm_code(&self) -> u8 {
        match self {
            TargetType::Unknown => 0,
            TargetType::Vehicle => 1,
            TargetType::NonVehicle => 4,
            TargetType::Pedestrian => 3,
            TargetType::Obstacle => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensorPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SensorPosition {
    pub fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// A single sensor-frame observation. Immutable once placed in a `TrackBatch`.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub id: u32,
    pub target_type: TargetType,
    pub position: SensorPosition,
    pub velocity_scalar: f64,
    pub heading_deg: f64,
    pub confidence: f64,
    pub timestamp: Instant,
    pub sensor_id: u8,
}

/// Producer-local, mutable builder for a batch of measurements. Not `Send` across
/// producers by convention: a single adapter thread owns one at a time and finishes it
/// into an immutable handle before handing it off.
#[derive(Debug, Default)]
pub struct MeasurementBatch {
    measurements: Vec<Measurement>,
}

impl MeasurementBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            measurements: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    pub fn clear(&mut self) {
        self.measurements.clear();
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Publishes the batch as an immutable, reference-counted `TrackBatch`, consuming the
    /// builder (invariant M1: the producer cannot mutate it again after this point).
    pub fn finish(self) -> std::sync::Arc<TrackBatch> {
        std::sync::Arc::new(TrackBatch {
            measurements: self.measurements,
        })
    }
}

/// An immutable, append-only list of measurements, shared via `Arc`. The reference count
/// `Arc` maintains is the original's "ref_count"; dropping the last `Arc` releases the
/// storage, matching invariant M2.
#[derive(Debug)]
pub struct TrackBatch {
    measurements: Vec<Measurement>,
}

impl TrackBatch {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Measurement> {
        self.measurements.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.measurements.iter()
    }
}

impl<'a> IntoIterator for &'a TrackBatch {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.measurements.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(sensor_id: u8) -> Measurement {
        Measurement {
            id: 1,
            target_type: TargetType::Vehicle,
            position: SensorPosition::planar(1.0, 2.0),
            velocity_scalar: 0.0,
            heading_deg: 0.0,
            confidence: 0.5,
            timestamp: Instant::now(),
            sensor_id,
        }
    }

    #[test]
    fn finish_produces_immutable_arc_batch() {
        let mut builder = MeasurementBatch::with_capacity(2);
        builder.add(measurement(1));
        builder.add(measurement(1));
        let batch = builder.finish();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn arc_clone_is_the_retain_and_drop_is_the_release() {
        let mut builder = MeasurementBatch::with_capacity(1);
        builder.add(measurement(2));
        let batch = builder.finish();
        assert_eq!(std::sync::Arc::strong_count(&batch), 1);
        let retained = batch.clone();
        assert_eq!(std::sync::Arc::strong_count(&batch), 2);
        drop(retained);
        assert_eq!(std::sync::Arc::strong_count(&batch), 1);
    }

    #[test]
    fn rsm_code_maps_every_variant_into_range() {
        for t in [
            TargetType::Vehicle,
            TargetType::NonVehicle,
            TargetType::Pedestrian,
            TargetType::Obstacle,
            TargetType::Unknown,
        ] {
            assert!(t.rsm_code() <= 4);
        }
    }
}
