use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use ccdi_common::{ShiftSpeeds, TimeCorrection};
use ccdi_imager_interface::Timestamp;
use log::debug;
use serde_derive::{Deserialize, Serialize};

// ============================================ PUBLIC =============================================

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExposureStatus {
    #[default]
    None = 0,
    WaitStart = 1,
    Clear = 2,
    Expose = 3,
    PreReadout = 4,
    Readout = 5,
    PostReadout = 6,
}

impl ExposureStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitStart,
            2 => Self::Clear,
            3 => Self::Expose,
            4 => Self::PreReadout,
            5 => Self::Readout,
            6 => Self::PostReadout,
            _ => Self::None,
        }
    }
}

/// Cloneable view of the running session for other threads: request an
/// abort, read the exposure status and the number of frames read so far.
///
/// The abort is cooperative and is noticed on the next poll of the loop.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn abort(&self) {
        debug!("Abort requested");
        self.shared.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ExposureStatus {
        ExposureStatus::from_u8(self.shared.status.load(Ordering::SeqCst))
    }

    pub fn images_read(&self) -> u32 {
        self.shared.images.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_abort(&self) {
        self.shared.abort.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_images_read(&self, count: u32) {
        self.shared.images.store(count, Ordering::SeqCst);
    }

    fn set_status(&self, status: ExposureStatus) {
        self.shared.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Run wide state of the sequencer, readable by callers through `&`.
#[derive(Clone, Debug)]
pub struct MultirunSession {
    pub status: ExposureStatus,
    /// Seconds, as requested
    pub requested_exposure: f64,
    /// Seconds, as applied by the device
    pub corrected_exposure: f64,
    /// Time since the session started
    pub elapsed: Duration,
    /// Frames read in the current call
    pub image_index: u32,
    /// Last temperature read while the camera was idle
    pub temperature: f64,
    pub shift_speeds: ShiftSpeeds,
    pub correction: TimeCorrection,
    pub median: Option<f64>,
    pub multirun_start: Option<Timestamp>,
    pub start_time: Timestamp,
    /// Only limited for flat series
    pub max_duration: Option<Duration>,
    pub flat: bool,
    started: Option<Instant>,
    handle: SessionHandle,
}

impl MultirunSession {
    pub(crate) fn new(handle: SessionHandle) -> Self {
        Self {
            status: ExposureStatus::None,
            requested_exposure: 0.0,
            corrected_exposure: 0.0,
            elapsed: Duration::ZERO,
            image_index: 0,
            temperature: 0.0,
            shift_speeds: ShiftSpeeds::default(),
            correction: TimeCorrection::default(),
            median: None,
            multirun_start: None,
            start_time: Timestamp::default(),
            max_duration: None,
            flat: false,
            started: None,
            handle,
        }
    }

    pub(crate) fn begin(&mut self, flat: bool, max_duration: Option<Duration>) {
        self.flat = flat;
        self.max_duration = max_duration;
        self.started = Some(Instant::now());
        self.start_time = Timestamp::now();
        self.elapsed = Duration::ZERO;
        self.median = None;
    }

    /// Per acquisition call reset.
    pub(crate) fn begin_call(&mut self, requested_exposure: f64) {
        self.requested_exposure = requested_exposure;
        self.image_index = 0;
        self.multirun_start = None;
        self.handle.set_images_read(0);
    }

    pub(crate) fn set_status(&mut self, status: ExposureStatus) {
        if self.status != status {
            debug!("Exposure status {:?} -> {:?}", self.status, status);
        }
        self.status = status;
        self.handle.set_status(status);
    }

    pub(crate) fn update_elapsed(&mut self) -> Duration {
        if let Some(started) = self.started {
            self.elapsed = started.elapsed();
        }
        self.elapsed
    }

    pub(crate) fn budget_exceeded(&mut self) -> bool {
        let elapsed = self.update_elapsed();
        self.max_duration.map_or(false, |max| elapsed > max)
    }

    pub(crate) fn finish(&mut self) {
        self.update_elapsed();
        self.set_status(ExposureStatus::None);
    }
}

// =========================================== PRIVATE =============================================

#[derive(Debug, Default)]
struct SessionShared {
    abort: AtomicBool,
    status: AtomicU8,
    images: AtomicU32,
}
