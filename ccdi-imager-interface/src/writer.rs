use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::Timestamp;

// ============================================ PUBLIC =============================================

/// Row-major 16-bit frame as read from the camera.
#[derive(Clone, PartialEq, Debug)]
pub struct AcquiredImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl AcquiredImage {
    /// Allocate a zeroed frame, reporting failure instead of aborting the process.
    pub fn try_new(width: usize, height: usize) -> Option<Self> {
        let len = width.checked_mul(height)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.resize(len, 0);
        Some(Self { width, height, data })
    }
}

/// Everything the image writer records next to the pixel data.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub instrument: String,
    pub telescope: String,
    pub group_id: String,
    pub proposal_id: String,
    pub exposure_type: String,
    pub multirun: u32,
    pub run: u32,
    pub window: u32,
    pub image_index: u32,
    pub image_count: u32,
    pub binning: usize,
    /// Seconds, as requested by the caller
    pub requested_exposure: f64,
    /// Seconds, as reported back by the device
    pub corrected_exposure: f64,
    pub multirun_start: Timestamp,
    pub exposure_start: Timestamp,
    pub exposure_end: Timestamp,
    pub median: f64,
    pub ccd_temperature: f64,
    pub horizontal_shift_speed: f64,
    pub vertical_shift_speed: f64,
    pub ntp_time: String,
    pub ntp_server: String,
    pub ntp_drift: f64,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum WriteErrorKind {
    Create,
    Data,
    Header,
}

#[derive(Clone, PartialEq, Debug, Error)]
#[error("{kind:?} failed: {detail}")]
pub struct WriteError {
    pub kind: WriteErrorKind,
    pub detail: String,
}

impl WriteError {
    pub fn new(kind: WriteErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

/// Image container writer. Must refuse to overwrite an existing file.
pub trait ImageWriter: Send {
    fn write_image(
        &mut self,
        path: &Path,
        image: &AcquiredImage,
        metadata: &FrameMetadata,
    ) -> Result<(), WriteError>;
}
