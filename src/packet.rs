//! M8 wire format parsing
//!
//! Packet format (little-endian, 6612 bytes):
//! - 50 firing records of 132 bytes each:
//!   - Encoder position (2 bytes) + padding (2 bytes)
//!   - Distances (3 returns x 8 lasers x 4 bytes, 1 cm resolution)
//!   - Intensities (3 returns x 8 lasers x 1 byte)
//!   - Status (8 lasers x 1 byte)
//! - Trailer (12 bytes): seconds, nanoseconds, status (4 bytes each)
//!
//! The M8 is ultimately a multi-echo sensor; only return 0 carries data
//! today, returns 1 and 2 are parsed and ignored.

/// Size of one TCP packet.
pub const PACKET_SIZE: usize = 6612;
/// Size of one firing record within a packet.
pub const FIRING_BYTES: usize = 132;
/// Number of firings per TCP packet.
pub const FIRINGS_PER_PACKET: usize = 50;
/// Number of lasers on the M8 sensor.
pub const NUM_LASERS: usize = 8;
/// Number of return channels per laser.
pub const NUM_RETURNS: usize = 3;
/// Number of discrete encoder positions per revolution.
pub const NUM_ROT_ANGLES: u16 = 10400;
/// Default TCP data port of the sensor.
pub const DATA_PORT: u16 = 4141;

/// Position delta above which a first-to-last comparison is treated as
/// encoder wraparound rather than genuine backward motion.
const WRAP_DELTA: i32 = 4000;

/// One firing across all lasers at a given encoder position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringData {
    pub position: u16,
    pub returns_distances: [[u32; NUM_LASERS]; NUM_RETURNS],
    pub returns_intensities: [[u8; NUM_LASERS]; NUM_RETURNS],
    pub returns_status: [u8; NUM_LASERS],
}

/// One decoded TCP packet: 50 firings plus the capture timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub firings: Vec<FiringData>,
    pub seconds: u32,
    pub nanoseconds: u32,
    pub status: u32,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn parse_firing(bytes: &[u8]) -> FiringData {
    let position = read_u16(bytes, 0);
    // two padding bytes follow the position

    let mut returns_distances = [[0u32; NUM_LASERS]; NUM_RETURNS];
    for r in 0..NUM_RETURNS {
        for laser in 0..NUM_LASERS {
            returns_distances[r][laser] = read_u32(bytes, 4 + (r * NUM_LASERS + laser) * 4);
        }
    }

    let mut returns_intensities = [[0u8; NUM_LASERS]; NUM_RETURNS];
    for r in 0..NUM_RETURNS {
        for laser in 0..NUM_LASERS {
            returns_intensities[r][laser] = bytes[100 + r * NUM_LASERS + laser];
        }
    }

    let returns_status = bytes[124..132].try_into().unwrap();

    FiringData {
        position,
        returns_distances,
        returns_intensities,
        returns_status,
    }
}

/// Parse one raw packet. The queue guarantees the buffer size, so parsing
/// is total; garbage field values pass through and are tolerated downstream.
pub fn parse_packet(bytes: &[u8]) -> DataPacket {
    debug_assert_eq!(bytes.len(), PACKET_SIZE);

    let firings = (0..FIRINGS_PER_PACKET)
        .map(|i| parse_firing(&bytes[i * FIRING_BYTES..(i + 1) * FIRING_BYTES]))
        .collect();

    let trailer = FIRINGS_PER_PACKET * FIRING_BYTES;
    DataPacket {
        firings,
        seconds: read_u32(bytes, trailer),
        nanoseconds: read_u32(bytes, trailer + 4),
        status: read_u32(bytes, trailer + 8),
    }
}

/// Azimuth of an encoder position, shifted into `[-180, 180)` degrees.
pub fn azimuth_degrees(position: u16) -> f64 {
    let shifted = (position as u32 + NUM_ROT_ANGLES as u32 / 2) % NUM_ROT_ANGLES as u32;
    (shifted as f64) / (NUM_ROT_ANGLES as f64) * 360.0 - 180.0
}

/// The sensor counts as spinning when the encoder moved at least one tenth
/// of a firing count between the first and last firing of a packet.
pub fn is_spinning(first: u16, last: u16) -> bool {
    (first as i32 - last as i32).abs() >= FIRINGS_PER_PACKET as i32 / 10
}

/// Spin direction from the first and last encoder position of a packet:
/// +1 for forward, -1 for backward. A delta larger than [`WRAP_DELTA`] is
/// a full-revolution wraparound, not a direction reversal, and flips the
/// sign. `(10399, 2)` is forward motion across the wrap, not backward.
pub fn spin_direction(first: u16, last: u16) -> i32 {
    let delta = last as i32 - first as i32;
    let sign = if delta >= 0 { 1 } else { -1 };
    if delta.abs() > WRAP_DELTA {
        -sign
    } else {
        sign
    }
}

#[cfg(test)]
pub(crate) mod test_packets {
    use super::*;

    /// Build a synthetic raw packet with the given firing positions. Every
    /// laser on return channel 0 gets the same distance and intensity.
    pub(crate) fn build_packet(
        positions: &[u16],
        distance_cm: u32,
        intensity: u8,
        seconds: u32,
        nanoseconds: u32,
    ) -> Vec<u8> {
        assert_eq!(positions.len(), FIRINGS_PER_PACKET);
        let mut bytes = vec![0u8; PACKET_SIZE];
        for (i, &position) in positions.iter().enumerate() {
            let base = i * FIRING_BYTES;
            bytes[base..base + 2].copy_from_slice(&position.to_le_bytes());
            for laser in 0..NUM_LASERS {
                let offset = base + 4 + laser * 4;
                bytes[offset..offset + 4].copy_from_slice(&distance_cm.to_le_bytes());
                bytes[base + 100 + laser] = intensity;
            }
        }
        let trailer = FIRINGS_PER_PACKET * FIRING_BYTES;
        bytes[trailer..trailer + 4].copy_from_slice(&seconds.to_le_bytes());
        bytes[trailer + 4..trailer + 8].copy_from_slice(&nanoseconds.to_le_bytes());
        bytes
    }

    /// Firing positions `start..start + 50`.
    pub(crate) fn consecutive_positions(start: u16) -> Vec<u16> {
        (0..FIRINGS_PER_PACKET as u16).map(|i| start + i).collect()
    }
}
