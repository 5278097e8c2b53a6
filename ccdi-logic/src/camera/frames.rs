use std::{
    thread::sleep,
    time::{Duration, Instant},
};

use ccdi_imager_interface::{AcquiredImage, CameraDevice, DeviceError, Timestamp};
use log::{debug, warn};

use crate::{camera::SessionHandle, error::MultirunError};

// ============================================ PUBLIC =============================================

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FramePolling {
    /// Pause after starting the acquisition
    pub settle: Duration,
    /// Pause between two device polls
    pub poll: Duration,
    /// Allowed gap between two frames on top of the exposure length
    pub read_timeout: Duration,
}

/// Pulls frames out of a running acquisition, oldest first.
///
/// Finite and not restartable: it ends after `requested` frames, on abort or
/// on timeout. The device is stopped on every way out, including drop.
pub struct FrameSource<'a> {
    device: &'a mut dyn CameraDevice,
    handle: &'a SessionHandle,
    image: AcquiredImage,
    polling: FramePolling,
    /// Longest allowed gap between two frames
    frame_timeout: Duration,
    requested: u32,
    retrieved: u32,
    last_frame: Instant,
    stopped: bool,
}

impl<'a> FrameSource<'a> {
    /// Start the acquisition and wait the settle interval.
    pub fn start(
        device: &'a mut dyn CameraDevice,
        handle: &'a SessionHandle,
        image: AcquiredImage,
        requested: u32,
        exposure: f64,
        polling: FramePolling,
    ) -> Result<Self, MultirunError> {
        let exposure = Duration::try_from_secs_f64(exposure).map_err(|err| {
            MultirunError::InvalidArgument(format!("exposure length {} s: {}", exposure, err))
        })?;
        let frame_timeout = polling
            .read_timeout
            .checked_add(exposure)
            .unwrap_or(Duration::MAX);

        let last_frame = Instant::now();
        device
            .start_acquisition()
            .map_err(MultirunError::device("start acquisition"))?;

        let source = Self {
            device,
            handle,
            image,
            polling,
            frame_timeout,
            requested,
            retrieved: 0,
            last_frame,
            stopped: false,
        };

        sleep(polling.settle);
        Ok(source)
    }

    /// Block until the next frame is in [`FrameSource::image`] and return the
    /// instant it was read, or `None` once all requested frames were read.
    pub fn next_frame(&mut self) -> Result<Option<Timestamp>, MultirunError> {
        loop {
            if self.retrieved >= self.requested {
                self.stop();
                return Ok(None);
            }

            sleep(self.polling.poll);

            let since_last = self.last_frame.elapsed();
            if since_last > self.frame_timeout {
                self.stop();
                return Err(MultirunError::Timeout {
                    elapsed: since_last,
                    image: self.retrieved + 1,
                });
            }

            if self.handle.abort_requested() {
                self.stop();
                if let Err(error) = self.device.free_internal_memory() {
                    warn!("Could not free driver memory after abort: {}", error);
                }
                return Err(MultirunError::Aborted);
            }

            if let Some(done_at) = self.read_oldest()? {
                return Ok(Some(done_at));
            }

            if !self.stopped {
                match self.device.total_images_acquired() {
                    Ok(total) if total >= self.requested => self.stop(),
                    Ok(_) => {}
                    Err(error) => debug!("Image count query failed: {}", error),
                }
            }
        }
    }

    pub fn image(&self) -> &AcquiredImage {
        &self.image
    }

    pub fn retrieved(&self) -> u32 {
        self.retrieved
    }

    /// Stop the device acquisition, once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }

        self.stopped = true;
        match self.device.abort_acquisition() {
            Ok(()) | Err(DeviceError::NotAcquiring) => debug!("Acquisition stopped"),
            Err(error) => warn!("Could not stop acquisition: {}", error),
        }
    }
}

impl Drop for FrameSource<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =========================================== PRIVATE =============================================

impl FrameSource<'_> {
    fn read_oldest(&mut self) -> Result<Option<Timestamp>, MultirunError> {
        match self.device.new_images_available() {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(error) => {
                debug!("New image query failed: {}", error);
                return Ok(None);
            }
        }

        match self.device.oldest_image(&mut self.image.data) {
            Ok(()) => {
                let done_at = Timestamp::now();
                self.retrieved += 1;
                self.last_frame = Instant::now();
                self.handle.set_images_read(self.retrieved);
                debug!("Read image {} of {}", self.retrieved, self.requested);
                Ok(Some(done_at))
            }
            Err(DeviceError::ArraySizeInvalid) => {
                self.stop();
                Err(MultirunError::ArraySizeInvalid)
            }
            Err(error) => {
                debug!("Image not ready yet: {}", error);
                Ok(None)
            }
        }
    }
}

// ============================================= TESTS =============================================
