use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use ccdi_imager_interface::{
    AcquisitionMode, AcquisitionTimings, CameraDevice, DetectorSize, DeviceError, DeviceStatus,
};
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

// ============================================ PUBLIC =============================================

/// Simulated frame-transfer CCD with a driver side ring buffer.
///
/// Frames appear every frame period after `start_acquisition` and stay in the
/// ring until read, the oldest one being dropped when the ring overflows.
pub struct DemoCamera {
    detector: DetectorSize,
    binning: usize,
    exposure: f64,
    frame_period: Option<Duration>,
    mode: AcquisitionMode,
    frame_transfer: bool,
    horizontal_speeds: Vec<f64>,
    vertical_speeds: Vec<f64>,
    horizontal_index: usize,
    vertical_index: usize,
    acquisition: Option<Acquisition>,
    ring: VecDeque<Vec<u16>>,
    ring_capacity: usize,
    total_acquired: u32,
    sky: SkyModel,
    transient_failures: u32,
    invalid_array_size: bool,
    stalled: bool,
    temperature: f64,
    rng: StdRng,
}

/// Pixel level model: `bias + rate * exposure`, the rate multiplied by
/// `rate_factor` after every frame to mimic a darkening twilight sky.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct SkyModel {
    pub bias: f64,
    pub rate: f64,
    pub rate_factor: f64,
    pub noise: f64,
}

impl Default for SkyModel {
    fn default() -> Self {
        Self {
            bias: 1000.0,
            rate: 10000.0,
            rate_factor: 1.0,
            noise: 20.0,
        }
    }
}

impl DemoCamera {
    pub fn new() -> Self {
        Self {
            detector: DetectorSize { columns: 1024, rows: 1024 },
            binning: 1,
            exposure: 1.0,
            frame_period: None,
            mode: AcquisitionMode::SingleScan,
            frame_transfer: false,
            horizontal_speeds: vec![0.1, 0.2, 0.5, 1.0],
            vertical_speeds: vec![38.55, 76.95],
            horizontal_index: 0,
            vertical_index: 0,
            acquisition: None,
            ring: VecDeque::new(),
            ring_capacity: 16,
            total_acquired: 0,
            sky: SkyModel::default(),
            transient_failures: 0,
            invalid_array_size: false,
            stalled: false,
            temperature: -60.0,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    pub fn with_detector(mut self, columns: usize, rows: usize) -> Self {
        self.detector = DetectorSize { columns, rows };
        self
    }

    /// Fixed interval between frames instead of exposure plus readout.
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = Some(period);
        self
    }

    pub fn with_sky(mut self, sky: SkyModel) -> Self {
        self.sky = sky;
        self
    }

    /// The next `count` image reads fail with a generic driver error.
    pub fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Every image read reports an invalid array size.
    pub fn with_invalid_array_size(mut self) -> Self {
        self.invalid_array_size = true;
        self
    }

    /// Acquisition starts but never produces a frame.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn binning(&self) -> usize {
        self.binning
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.mode
    }

    pub fn frame_transfer(&self) -> bool {
        self.frame_transfer
    }
}

impl Default for DemoCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDevice for DemoCamera {
    fn detector_size(&self) -> DetectorSize {
        self.detector
    }

    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        self.mode = mode;
        Ok(())
    }

    fn set_frame_transfer(&mut self, enabled: bool) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        self.frame_transfer = enabled;
        Ok(())
    }

    fn set_exposure_time(&mut self, seconds: f64) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(DeviceError::Code {
                code: 20066,
                message: format!("invalid exposure time {}", seconds),
            });
        }
        self.exposure = seconds;
        Ok(())
    }

    fn set_accumulations(&mut self, count: u32) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        match count {
            1 => Ok(()),
            _ => Err(DeviceError::Code {
                code: 20066,
                message: format!("demo camera supports one accumulation, {} requested", count),
            }),
        }
    }

    fn set_binning(&mut self, binning: usize) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        if binning == 0 || binning > self.detector.columns.min(self.detector.rows) {
            return Err(DeviceError::Code {
                code: 20066,
                message: format!("invalid binning {}", binning),
            });
        }
        self.binning = binning;
        Ok(())
    }

    fn horizontal_shift_speeds(&mut self) -> Result<Vec<f64>, DeviceError> {
        Ok(self.horizontal_speeds.clone())
    }

    fn vertical_shift_speeds(&mut self) -> Result<Vec<f64>, DeviceError> {
        Ok(self.vertical_speeds.clone())
    }

    fn select_horizontal_shift_speed(&mut self, index: usize) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        check_index(index, &self.horizontal_speeds)?;
        self.horizontal_index = index;
        Ok(())
    }

    fn select_vertical_shift_speed(&mut self, index: usize) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        check_index(index, &self.vertical_speeds)?;
        self.vertical_index = index;
        Ok(())
    }

    fn acquisition_timings(&mut self) -> Result<AcquisitionTimings, DeviceError> {
        let exposure = (self.exposure * 1000.0).round() / 1000.0;
        Ok(AcquisitionTimings {
            exposure,
            accumulate: exposure,
            kinetic: self.period().as_secs_f64(),
        })
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        debug!("Demo camera: acquisition started, period {:?}", self.period());
        self.ring.clear();
        self.total_acquired = 0;
        self.acquisition = Some(Acquisition {
            started: Instant::now(),
            produced: 0,
            stopped: false,
        });
        Ok(())
    }

    fn abort_acquisition(&mut self) -> Result<(), DeviceError> {
        self.refresh();
        match self.acquisition.as_mut() {
            Some(acquisition) if !acquisition.stopped => {
                debug!("Demo camera: acquisition stopped after {} frames", acquisition.produced);
                acquisition.stopped = true;
                Ok(())
            }
            _ => Err(DeviceError::NotAcquiring),
        }
    }

    fn status(&mut self) -> Result<DeviceStatus, DeviceError> {
        Ok(match self.acquiring() {
            true => DeviceStatus::Acquiring,
            false => DeviceStatus::Idle,
        })
    }

    fn total_images_acquired(&mut self) -> Result<u32, DeviceError> {
        self.refresh();
        Ok(self.total_acquired)
    }

    fn new_images_available(&mut self) -> Result<u32, DeviceError> {
        self.refresh();
        Ok(self.ring.len() as u32)
    }

    fn oldest_image(&mut self, buffer: &mut [u16]) -> Result<(), DeviceError> {
        self.refresh();
        let (width, height) = self.detector.binned(self.binning);

        if self.invalid_array_size || buffer.len() != width * height {
            return Err(DeviceError::ArraySizeInvalid);
        }

        if self.transient_failures > 0 && !self.ring.is_empty() {
            self.transient_failures -= 1;
            return Err(DeviceError::Code {
                code: 20013,
                message: String::from("acquisition error, retry"),
            });
        }

        let frame = self.ring.pop_front().ok_or(DeviceError::NoNewData)?;
        buffer.copy_from_slice(&frame);
        Ok(())
    }

    fn temperature(&mut self) -> Result<f64, DeviceError> {
        self.ensure_idle()?;
        Ok(self.temperature)
    }

    fn free_internal_memory(&mut self) -> Result<(), DeviceError> {
        self.ensure_idle()?;
        self.ring.clear();
        Ok(())
    }
}

// =========================================== PRIVATE =============================================

struct Acquisition {
    started: Instant,
    produced: u32,
    stopped: bool,
}

impl DemoCamera {
    fn acquiring(&self) -> bool {
        matches!(&self.acquisition, Some(acquisition) if !acquisition.stopped)
    }

    fn ensure_idle(&self) -> Result<(), DeviceError> {
        match self.acquiring() {
            true => Err(DeviceError::Code {
                code: 20072,
                message: String::from("acquisition in progress"),
            }),
            false => Ok(()),
        }
    }

    fn period(&self) -> Duration {
        self.frame_period.unwrap_or_else(|| {
            let (columns, rows) = self.detector.binned(self.binning);
            let vertical = self.vertical_speeds[self.vertical_index];
            let horizontal = self.horizontal_speeds[self.horizontal_index];
            let readout_us = rows as f64 * vertical + (columns * rows) as f64 * horizontal;
            Duration::from_secs_f64(self.exposure + readout_us * 1e-6)
        })
    }

    /// Produce every frame whose readout finished by now.
    fn refresh(&mut self) {
        if self.stalled || !self.acquiring() {
            return;
        }

        let period = self.period().as_secs_f64().max(1e-3);
        let due = match &self.acquisition {
            Some(acquisition) => (acquisition.started.elapsed().as_secs_f64() / period) as u32,
            None => return,
        };

        while self.acquisition.as_ref().map_or(false, |acquisition| acquisition.produced < due) {
            let frame = self.render_frame();
            if self.ring.len() == self.ring_capacity {
                self.ring.pop_front();
            }
            self.ring.push_back(frame);
            self.total_acquired += 1;
            self.sky.rate *= self.sky.rate_factor;
            if let Some(acquisition) = self.acquisition.as_mut() {
                acquisition.produced += 1;
            }
        }
    }

    fn render_frame(&mut self) -> Vec<u16> {
        let (columns, rows) = self.detector.binned(self.binning);
        let level = self.sky.bias + self.sky.rate * self.exposure;
        let noise = self.sky.noise.abs();
        let rng = &mut self.rng;

        (0..columns * rows)
            .map(|_| {
                let offset = match noise > 0.0 {
                    true => rng.gen_range(-noise..noise),
                    false => 0.0,
                };
                (level + offset).clamp(0.0, 65535.0) as u16
            })
            .collect()
    }
}

fn check_index(index: usize, speeds: &[f64]) -> Result<(), DeviceError> {
    match index < speeds.len() {
        true => Ok(()),
        false => Err(DeviceError::Code {
            code: 20066,
            message: format!("shift speed index {} out of range", index),
        }),
    }
}

// ============================================= TESTS =============================================
