use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

// ============================================ PUBLIC =============================================

/// Acquisition modes understood by the camera. Multiruns use `RunTillAbort`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum AcquisitionMode {
    SingleScan,
    Kinetics,
    RunTillAbort,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    Acquiring,
    TemperatureCycle,
}

/// Timing actually applied by the device after rounding to its clock.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct AcquisitionTimings {
    /// Seconds
    pub exposure: f64,
    /// Seconds
    pub accumulate: f64,
    /// Seconds
    pub kinetic: f64,
}

/// Unbinned detector geometry in pixels.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct DetectorSize {
    pub columns: usize,
    pub rows: usize,
}

impl DetectorSize {
    pub fn binned(&self, binning: usize) -> (usize, usize) {
        let binning = binning.max(1);
        (self.columns / binning, self.rows / binning)
    }
}

#[derive(Clone, PartialEq, Debug, Error)]
pub enum DeviceError {
    #[error("image array size invalid")]
    ArraySizeInvalid,
    #[error("no new data available")]
    NoNewData,
    #[error("device not acquiring")]
    NotAcquiring,
    #[error("device error {code}: {message}")]
    Code { code: u32, message: String },
}

/// Camera driver capability used by the acquisition sequencer.
///
/// All calls are blocking. Images are kept in a driver-owned ring buffer and
/// are handed out oldest first.
pub trait CameraDevice: Send {
    fn detector_size(&self) -> DetectorSize;

    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError>;
    fn set_frame_transfer(&mut self, enabled: bool) -> Result<(), DeviceError>;
    /// Exposure length in seconds
    fn set_exposure_time(&mut self, seconds: f64) -> Result<(), DeviceError>;
    fn set_accumulations(&mut self, count: u32) -> Result<(), DeviceError>;
    fn set_binning(&mut self, binning: usize) -> Result<(), DeviceError>;

    /// Available horizontal shift speeds, microseconds per pixel.
    fn horizontal_shift_speeds(&mut self) -> Result<Vec<f64>, DeviceError>;
    /// Available vertical shift speeds, microseconds per pixel.
    fn vertical_shift_speeds(&mut self) -> Result<Vec<f64>, DeviceError>;
    fn select_horizontal_shift_speed(&mut self, index: usize) -> Result<(), DeviceError>;
    fn select_vertical_shift_speed(&mut self, index: usize) -> Result<(), DeviceError>;
    fn acquisition_timings(&mut self) -> Result<AcquisitionTimings, DeviceError>;

    fn start_acquisition(&mut self) -> Result<(), DeviceError>;
    fn abort_acquisition(&mut self) -> Result<(), DeviceError>;
    fn status(&mut self) -> Result<DeviceStatus, DeviceError>;

    /// Number of images acquired since the acquisition started.
    fn total_images_acquired(&mut self) -> Result<u32, DeviceError>;
    /// Number of images waiting in the ring buffer.
    fn new_images_available(&mut self) -> Result<u32, DeviceError>;
    /// Copy the oldest buffered image into `buffer` and drop it from the ring.
    fn oldest_image(&mut self, buffer: &mut [u16]) -> Result<(), DeviceError>;

    /// Only valid while the device is idle.
    fn temperature(&mut self) -> Result<f64, DeviceError>;
    /// Release driver memory claimed for an acquisition.
    fn free_internal_memory(&mut self) -> Result<(), DeviceError>;
}
