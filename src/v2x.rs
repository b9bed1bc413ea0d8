//! V2X RSM encoder (C6): fixed-field little-endian binary packet with scaled integer
//! units.
//!
//! Grounded on `mec_v2x.h` (`v2x_header_t`, `v2x_rsm_participant_t`) and `main.c`'s
//! `v2x_encode_rsm(fused, 0xABCD, buffer, &len)` call site for field widths and scaling
//! factors.

use crate::errors::{FusionError, FusionResult};
use crate::fusion::FusedTrackView;

pub const MAGIC: u8 = 0x01;
pub const VERSION: u8 = 0x01;
pub const MSG_TYPE_RSM: u8 = 0x01;

const HEADER_LEN: usize = 16;
const PARTICIPANT_LEN: usize = 16;

/// Encodes `snapshot` as an RSM packet into `buf`, returning the number of bytes
/// written. Writes nothing and returns `BufferTooSmall`-flavored `InvalidArgument` if
/// `buf` cannot hold the whole packet. Out-of-range fields saturate/clamp rather than
/// error (§4.6): speed and heading saturate at their `u16` maxima, confidence clamps to
/// 200, unrecognized types become 0.
pub fn encode_rsm(
    snapshot: &[FusedTrackView],
    rsu_id: u32,
    timestamp_ms: u64,
    buf: &mut [u8],
) -> FusionResult<usize> {
    let required = HEADER_LEN + snapshot.len() * PARTICIPANT_LEN;
    if required > buf.len() {
        return Err(FusionError::InvalidArgument(format!(
            "buffer too small: need {required}, have {}",
            buf.len()
        )));
    }
    let count: u8 = snapshot
        .len()
        .try_into()
        .map_err(|_| FusionError::InvalidArgument("snapshot has more than 255 tracks".to_string()))?;

    let mut offset = 0;
    buf[offset] = MAGIC;
    offset += 1;
    buf[offset] = VERSION;
    offset += 1;
    buf[offset] = MSG_TYPE_RSM;
    offset += 1;
    buf[offset..offset + 4].copy_from_slice(&rsu_id.to_le_bytes());
    offset += 4;
    buf[offset..offset + 8].copy_from_slice(&timestamp_ms.to_le_bytes());
    offset += 8;
    buf[offset] = count;
    offset += 1;
    debug_assert_eq!(offset, HEADER_LEN);

    for track in snapshot {
        let target_id: u16 = (track.global_id & 0xFFFF) as u16;
        let rsm_type = track.target_type.rsm_code();
        let lat_field = scale_i32(track.position.0, 1.0e7);
        let lon_field = scale_i32(track.position.1, 1.0e7);
        let speed_field = scale_u16_saturating(track.velocity, 50.0);
        let heading_field = scale_u16_saturating(normalize_heading(track.heading_deg), 80.0);
        let confidence_field = (track.confidence.clamp(0.0, 1.0) * 200.0).round().clamp(0.0, 200.0) as u8;

        buf[offset..offset + 2].copy_from_slice(&target_id.to_le_bytes());
        offset += 2;
        buf[offset] = rsm_type;
        offset += 1;
        buf[offset..offset + 4].copy_from_slice(&lat_field.to_le_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&lon_field.to_le_bytes());
        offset += 4;
        buf[offset..offset + 2].copy_from_slice(&speed_field.to_le_bytes());
        offset += 2;
        buf[offset..offset + 2].copy_from_slice(&heading_field.to_le_bytes());
        offset += 2;
        buf[offset] = confidence_field;
        offset += 1;
    }

    Ok(offset)
}

fn scale_i32(value: f64, scale: f64) -> i32 {
    let scaled = value * scale;
    scaled.clamp(i32::MIN as f64, i32::MAX as f64).round() as i32
}

fn scale_u16_saturating(value: f64, scale: f64) -> u16 {
    let scaled = value * scale;
    scaled.clamp(0.0, u16::MAX as f64).round() as u16
}

fn normalize_heading(heading_deg: f64) -> f64 {
    let h = heading_deg % 360.0;
    if h < 0.0 { h + 360.0 } else { h }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    pub magic: u8,
    pub version: u8,
    pub msg_type: u8,
    pub device_id: u32,
    pub timestamp_ms: u64,
    pub count: u8,
}

/// Decodes the header of an encoded packet. Used by tests and by any downstream
/// consumer wanting to sanity-check its own encoding without a full RSM decoder.
pub fn decode_header(buf: &[u8]) -> FusionResult<DecodedHeader> {
    if buf.len() < HEADER_LEN {
        return Err(FusionError::InvalidArgument("buffer shorter than header".to_string()));
    }
    Ok(DecodedHeader {
        magic: buf[0],
        version: buf[1],
        msg_type: buf[2],
        device_id: u32::from_le_bytes(buf[3..7].try_into().unwrap()),
        timestamp_ms: u64::from_le_bytes(buf[7..15].try_into().unwrap()),
        count: buf[15],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TargetType;

    fn view(lat: f64, lon: f64, velocity: f64, heading_deg: f64, confidence: f64) -> FusedTrackView {
        FusedTrackView {
            global_id: 1,
            target_type: TargetType::Vehicle,
            position: (lat, lon),
            velocity,
            heading_deg,
            confidence,
        }
    }

    // R1: header round-trips.
    #[test]
    fn header_round_trips() {
        let snapshot = vec![view(39.9, 116.4, 5.0, 90.0, 0.5)];
        let mut buf = [0u8; 64];
        let n = encode_rsm(&snapshot, 0xABCD, 1_000, &mut buf).unwrap();
        let header = decode_header(&buf[..n]).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.msg_type, MSG_TYPE_RSM);
        assert_eq!(header.device_id, 0xABCD);
        assert_eq!(header.count, 1);
    }

    // S6: exact field scaling.
    #[test]
    fn participant_fields_scale_as_specified() {
        let snapshot = vec![view(39.9, 116.4, 5.0, 90.0, 0.5)];
        let mut buf = [0u8; 64];
        encode_rsm(&snapshot, 0xABCD, 0, &mut buf).unwrap();

        let p = &buf[HEADER_LEN..HEADER_LEN + PARTICIPANT_LEN];
        let lat = i32::from_le_bytes(p[3..7].try_into().unwrap());
        let lon = i32::from_le_bytes(p[7..11].try_into().unwrap());
        let speed = u16::from_le_bytes(p[11..13].try_into().unwrap());
        let heading = u16::from_le_bytes(p[13..15].try_into().unwrap());
        let confidence = p[15];

        assert_eq!(lat, 399_000_000);
        assert_eq!(lon, 1_164_000_000);
        assert_eq!(speed, 250);
        assert_eq!(heading, 7200);
        assert_eq!(confidence, 100);
    }

    #[test]
    fn buffer_too_small_writes_nothing_detectably() {
        let snapshot = vec![view(0.0, 0.0, 0.0, 0.0, 0.0)];
        let mut buf = [0xFFu8; 8];
        let result = encode_rsm(&snapshot, 1, 0, &mut buf);
        assert!(result.is_err());
        assert!(buf.iter().all(|&b| b == 0xFF), "buffer must be untouched on failure");
    }

    #[test]
    fn speed_and_heading_saturate_at_u16_max() {
        let snapshot = vec![view(0.0, 0.0, 10_000.0, 10_000.0, 2.0)];
        let mut buf = [0u8; 64];
        encode_rsm(&snapshot, 1, 0, &mut buf).unwrap();
        let p = &buf[HEADER_LEN..HEADER_LEN + PARTICIPANT_LEN];
        let speed = u16::from_le_bytes(p[11..13].try_into().unwrap());
        let confidence = p[15];
        assert_eq!(speed, u16::MAX);
        assert_eq!(confidence, 200);
    }
}
