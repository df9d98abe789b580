//! Precomputed trigonometry for the conversion hot path

use crate::packet::{NUM_LASERS, NUM_ROT_ANGLES};

/// Vertical angle of each laser in radians. Device constant of the M8,
/// not supplied by the sensor.
pub const VERTICAL_ANGLES: [f64; NUM_LASERS] = [
    -0.318505, -0.2692, -0.218009, -0.165195, -0.111003, -0.0557982, 0.0, 0.0557982,
];

/// Cosine/sine lookup for every discrete encoder position plus per-laser
/// vertical angle trigonometry. Built once at client construction.
pub struct AngleTables {
    cos_horizontal: Vec<f64>,
    sin_horizontal: Vec<f64>,
    cos_vertical: [f64; NUM_LASERS],
    sin_vertical: [f64; NUM_LASERS],
}

impl AngleTables {
    pub fn new() -> AngleTables {
        let n = NUM_ROT_ANGLES as usize;
        let mut cos_horizontal = Vec::with_capacity(n + 1);
        let mut sin_horizontal = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let degrees = (i as f64) / (n as f64) * 360.0;
            let radians = degrees.to_radians();
            cos_horizontal.push(radians.cos());
            sin_horizontal.push(radians.sin());
        }

        let mut cos_vertical = [0.0; NUM_LASERS];
        let mut sin_vertical = [0.0; NUM_LASERS];
        for (i, angle) in VERTICAL_ANGLES.iter().enumerate() {
            cos_vertical[i] = angle.cos();
            sin_vertical[i] = angle.sin();
        }

        AngleTables {
            cos_horizontal,
            sin_horizontal,
            cos_vertical,
            sin_vertical,
        }
    }

    /// (cos, sin) of the azimuth at an encoder position. The wire may carry
    /// any u16 in a malformed packet, so the index wraps into table range.
    pub fn horizontal(&self, position: u16) -> (f64, f64) {
        let index = (position % NUM_ROT_ANGLES) as usize;
        (self.cos_horizontal[index], self.sin_horizontal[index])
    }

    /// (cos, sin) of the vertical angle of a laser.
    pub fn vertical(&self, laser: usize) -> (f64, f64) {
        (self.cos_vertical[laser], self.sin_vertical[laser])
    }
}

impl Default for AngleTables {
    fn default() -> AngleTables {
        AngleTables::new()
    }
}
