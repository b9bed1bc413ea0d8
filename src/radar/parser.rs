//! Radar frame parser (C3): a five-state DFA resynchronizing on a preamble out of a
//! noisy serial byte stream.
//!
//! Grounded directly on `radar_read_data` in `radar_processor.c`: `IDLE -> HEAD1 -> DATA
//! -> CHECK -> (emit | IDLE)`, 0xAA/0x55 preamble, 14-byte payload, XOR checksum as the
//! 15th payload-adjacent byte. On a checksum mismatch the frame is discarded and the DFA
//! returns to `IDLE` without reinterpreting the discarded byte as a new preamble
//! candidate — at most one frame is lost per mis-sync.

const PREAMBLE_HIGH: u8 = 0xAA;
const PREAMBLE_LOW: u8 = 0x55;
const PAYLOAD_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Head1,
    Data(usize),
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarDetection {
    pub target_id: u16,
    /// meters
    pub range: f64,
    /// degrees, centered (0 = dead ahead)
    pub angle_deg: f64,
    /// m/s
    pub velocity: f64,
    /// dB
    pub rcs: f64,
}

impl RadarDetection {
    /// `x = range*cos(theta), y = range*sin(theta)`, `theta = angle_deg * pi/180`.
    pub fn polar_to_cartesian(&self) -> (f64, f64) {
        let theta = self.angle_deg.to_radians();
        (self.range * theta.cos(), self.range * theta.sin())
    }

    pub fn confidence(&self) -> f64 {
        if self.rcs > -10.0 { 0.8 } else { 0.5 }
    }

    pub fn heading_deg(&self) -> f64 {
        let (x, y) = self.polar_to_cartesian();
        y.atan2(x).to_degrees()
    }
}

fn decode_payload(payload: &[u8; PAYLOAD_LEN]) -> RadarDetection {
    let target_id = u16::from_be_bytes([payload[0], payload[1]]);
    let range_raw = u16::from_be_bytes([payload[2], payload[3]]);
    let angle_raw = u16::from_be_bytes([payload[4], payload[5]]);
    let velocity_raw = u16::from_be_bytes([payload[6], payload[7]]);
    let rcs_raw = u16::from_be_bytes([payload[8], payload[9]]);

    RadarDetection {
        target_id,
        range: range_raw as f64 / 10.0,
        angle_deg: angle_raw as f64 / 10.0 - 180.0,
        velocity: velocity_raw as f64 / 10.0,
        rcs: rcs_raw as f64 / 10.0 - 50.0,
    }
}

/// Byte-at-a-time DFA. `feed` consumes exactly the bytes given and returns any frames
/// decoded along the way (normally zero or one per call, but a caller feeding a large
/// chunk may get several).
pub struct FrameParser {
    state: State,
    payload: [u8; PAYLOAD_LEN],
    discarded_frames: u64,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            payload: [0u8; PAYLOAD_LEN],
            discarded_frames: 0,
        }
    }

    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    /// Feeds a single byte through the DFA, returning a decoded detection if this byte
    /// completed a valid frame.
    pub fn feed_byte(&mut self, byte: u8) -> Option<RadarDetection> {
        match self.state {
            State::Idle => {
                if byte == PREAMBLE_HIGH {
                    self.state = State::Head1;
                }
                None
            }
            State::Head1 => {
                if byte == PREAMBLE_LOW {
                    self.state = State::Data(0);
                } else {
                    // Not a valid second preamble byte; re-evaluate it as a possible
                    // first preamble byte rather than dropping straight to Idle, so a
                    // run of 0xAA bytes still resyncs.
                    self.state = if byte == PREAMBLE_HIGH { State::Head1 } else { State::Idle };
                }
                None
            }
            State::Data(n) => {
                self.payload[n] = byte;
                let n = n + 1;
                self.state = if n == PAYLOAD_LEN { State::Check } else { State::Data(n) };
                None
            }
            State::Check => {
                self.state = State::Idle;
                let checksum = self.payload.iter().fold(0u8, |acc, b| acc ^ b);
                if checksum == byte {
                    Some(decode_payload(&self.payload))
                } else {
                    self.discarded_frames += 1;
                    None
                }
            }
        }
    }

    /// Feeds a full chunk of bytes, returning every detection decoded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<RadarDetection> {
        bytes.iter().filter_map(|&b| self.feed_byte(b)).collect()
    }
}

fn build_frame(payload: [u8; PAYLOAD_LEN]) -> Vec<u8> {
    let checksum = payload.iter().fold(0u8, |acc, b| acc ^ b);
    let mut frame = vec![PREAMBLE_HIGH, PREAMBLE_LOW];
    frame.extend_from_slice(&payload);
    frame.push(checksum);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> [u8; PAYLOAD_LEN] {
        let mut p = [0u8; PAYLOAD_LEN];
        p[0..2].copy_from_slice(&42u16.to_be_bytes()); // target_id
        p[2..4].copy_from_slice(&500u16.to_be_bytes()); // range = 50.0 m
        p[4..6].copy_from_slice(&1800u16.to_be_bytes()); // angle = 0 deg
        p[6..8].copy_from_slice(&150u16.to_be_bytes()); // velocity = 15.0 m/s
        p[8..10].copy_from_slice(&420u16.to_be_bytes()); // rcs = -8.0 dB
        p
    }

    #[test]
    fn decodes_a_well_formed_frame() {
        let mut parser = FrameParser::new();
        let frame = build_frame(sample_payload());
        let detections = parser.feed(&frame);
        assert_eq!(detections.len(), 1);
        let d = detections[0];
        assert_eq!(d.target_id, 42);
        assert!((d.range - 50.0).abs() < 1e-9);
        assert!((d.angle_deg - 0.0).abs() < 1e-9);
        assert!((d.velocity - 15.0).abs() < 1e-9);
        assert!((d.rcs - (-8.0)).abs() < 1e-9);
        assert!((d.confidence() - 0.8).abs() < 1e-9);
    }

    // S5: resync after noise and a false preamble byte.
    #[test]
    fn resyncs_after_garbage_and_a_false_preamble() {
        let mut parser = FrameParser::new();
        let mut stream = vec![0x11, 0x22, 0xAA, 0x33];
        stream.extend_from_slice(&build_frame(sample_payload()));
        let detections = parser.feed(&stream);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].target_id, 42);
    }

    // P2: mutating any payload byte invalidates the checksum.
    #[test]
    fn checksum_mismatch_discards_the_frame() {
        for i in 0..PAYLOAD_LEN {
            let mut tampered = build_frame(sample_payload());
            tampered[2 + i] ^= 0xFF;
            let mut parser = FrameParser::new();
            let detections = parser.feed(&tampered);
            assert!(detections.is_empty(), "byte {i} should have invalidated checksum");
            assert_eq!(parser.discarded_frames(), 1);
        }
    }

    #[test]
    fn garbage_only_stream_never_emits_and_never_panics() {
        let mut parser = FrameParser::new();
        let garbage: Vec<u8> = (0..=255u8).collect();
        let detections = parser.feed(&garbage);
        assert!(detections.is_empty());
    }

    #[test]
    fn polar_to_cartesian_matches_trig_identity() {
        let d = RadarDetection {
            target_id: 1,
            range: 10.0,
            angle_deg: 90.0,
            velocity: 0.0,
            rcs: 0.0,
        };
        let (x, y) = d.polar_to_cartesian();
        assert!(x.abs() < 1e-9);
        assert!((y - 10.0).abs() < 1e-9);
    }
}
