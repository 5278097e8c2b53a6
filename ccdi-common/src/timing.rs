use ccdi_imager_interface::{Timestamp, NANOS_PER_SECOND};
use serde_derive::{Deserialize, Serialize};

// ============================================ PUBLIC =============================================

/// Charge transfer rates in microseconds per pixel.
#[derive(Copy, Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct ShiftSpeeds {
    pub horizontal: f64,
    pub vertical: f64,
}

/// How long before the "image ready" instant the exposure started.
///
/// Computed once per acquisition command and reused for each of its frames.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct TimeCorrection {
    pub nanoseconds: i64,
}

impl TimeCorrection {
    pub fn new(columns: usize, rows: usize, speeds: ShiftSpeeds, exposure_seconds: f64) -> Self {
        let readout = readout_time_us(columns, rows, speeds);
        let frame_transfer = frame_transfer_time_us(rows, speeds);
        let nanoseconds = (readout + frame_transfer) * 1000.0 + exposure_seconds * 1e9;

        Self { nanoseconds: nanoseconds as i64 }
    }

    /// Move `timestamp` back by the correction, borrowing a second when needed.
    pub fn exposure_start(&self, timestamp: Timestamp) -> Timestamp {
        let seconds = self.nanoseconds.div_euclid(NANOS_PER_SECOND);
        let remainder = self.nanoseconds.rem_euclid(NANOS_PER_SECOND);

        let mut result = Timestamp::new(
            timestamp.seconds - seconds,
            timestamp.nanoseconds - remainder,
        );

        if result.nanoseconds < 0 {
            result.nanoseconds += NANOS_PER_SECOND;
            result.seconds -= 1;
        }

        result
    }

    /// Inverse of [`TimeCorrection::exposure_start`].
    pub fn readout_end(&self, timestamp: Timestamp) -> Timestamp {
        let seconds = self.nanoseconds.div_euclid(NANOS_PER_SECOND);
        let remainder = self.nanoseconds.rem_euclid(NANOS_PER_SECOND);

        let mut result = Timestamp::new(
            timestamp.seconds + seconds,
            timestamp.nanoseconds + remainder,
        );

        if result.nanoseconds >= NANOS_PER_SECOND {
            result.nanoseconds -= NANOS_PER_SECOND;
            result.seconds += 1;
        }

        result
    }
}

pub fn readout_time_us(columns: usize, rows: usize, speeds: ShiftSpeeds) -> f64 {
    let rows = rows as f64;
    rows * speeds.vertical + columns as f64 * rows * speeds.horizontal
}

pub fn frame_transfer_time_us(rows: usize, speeds: ShiftSpeeds) -> f64 {
    rows as f64 * speeds.vertical
}

// ============================================= TESTS =============================================
