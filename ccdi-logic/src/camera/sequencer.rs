use std::{path::PathBuf, sync::Arc, thread::sleep, time::Duration};

use ccdi_common::{region_median, ShiftSpeeds, StatsRegion, TimeCorrection};
use ccdi_imager_interface::{
    AcquiredImage, AcquisitionMode, CameraDevice, FrameMetadata, ImageWriter, Timestamp,
};
use chrono::Utc;
use log::{debug, error, info};

use crate::{
    camera::{ExposureStatus, FramePolling, FrameSource, MultirunSession, SessionHandle},
    error::MultirunError,
    ntp::ntp_drift_or_undefined,
    storage::{write_locked, ExposureType, FilenameAllocator},
    ServiceConfig,
};

// ============================================ PUBLIC =============================================

#[derive(Clone, PartialEq, Debug)]
pub struct MultirunRequest {
    /// Seconds
    pub exposure: f64,
    pub count: u32,
    pub binning: usize,
    pub exposure_type: ExposureType,
    /// Check every frame against the flat count windows
    pub flat: bool,
    /// Append to the latest multirun instead of opening a new one
    pub continue_multirun: bool,
    /// Wait for this instant before clearing the camera
    pub start_at: Option<Timestamp>,
    /// Time budget of a flat session, ignored for other exposures
    pub max_duration: Option<Duration>,
}

impl MultirunRequest {
    pub fn new(exposure: f64, count: u32) -> Self {
        Self {
            exposure,
            count,
            binning: 1,
            exposure_type: ExposureType::Exposure,
            flat: false,
            continue_multirun: false,
            start_at: None,
            max_duration: None,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct MultirunOutcome {
    pub saved: Vec<PathBuf>,
    /// Flat frame left the recalculation window, pick a new exposure and retry
    pub recalculate: bool,
    /// Flat frames inside the recalculation window but outside the save window
    pub discarded: u32,
    /// Median of the last frame read
    pub median: Option<f64>,
    /// Seconds, as applied by the device
    pub corrected_exposure: f64,
    /// Flat session ran out of time, the call ended early
    pub budget_exhausted: bool,
}

/// Drives the camera through multiruns and flat series.
///
/// Owns its device, so only one acquisition can run on it at a time.
pub struct Sequencer {
    pub(crate) config: Arc<ServiceConfig>,
    pub(crate) device: Box<dyn CameraDevice>,
    pub(crate) writer: Box<dyn ImageWriter>,
    pub(crate) allocator: FilenameAllocator,
    pub(crate) session: MultirunSession,
    pub(crate) handle: SessionHandle,
    last_error: Option<MultirunError>,
}

impl Sequencer {
    pub fn new(
        config: Arc<ServiceConfig>,
        device: Box<dyn CameraDevice>,
        writer: Box<dyn ImageWriter>,
    ) -> Result<Self, MultirunError> {
        config.validate().map_err(MultirunError::Config)?;
        let allocator = FilenameAllocator::new(&config.storage)?;
        let handle = SessionHandle::default();

        Ok(Self {
            config,
            device,
            writer,
            allocator,
            session: MultirunSession::new(handle.clone()),
            handle,
            last_error: None,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &MultirunSession {
        &self.session
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Error of the last failed call; asking when nothing failed is itself an error.
    pub fn last_error(&self) -> Result<&MultirunError, MultirunError> {
        self.last_error.as_ref().ok_or(MultirunError::NoError)
    }

    /// Take `request.count` frames and save each of them.
    pub fn multirun(&mut self, request: &MultirunRequest) -> Result<MultirunOutcome, MultirunError> {
        let max_duration = request.max_duration.filter(|_| request.flat);
        self.session.begin(request.flat, max_duration);
        self.handle.clear_abort();
        let result = self.run_multirun(request);
        self.finish(result)
    }

    pub(crate) fn finish<T>(&mut self, result: Result<T, MultirunError>) -> Result<T, MultirunError> {
        self.session.finish();

        if let Err(error) = &result {
            error!("Multirun failed ({}): {}", error.code(), error);
            self.last_error = Some(error.clone());
        }

        result
    }

    pub(crate) fn run_multirun(
        &mut self,
        request: &MultirunRequest,
    ) -> Result<MultirunOutcome, MultirunError> {
        validate_request(request)?;
        self.session.begin_call(request.exposure);

        if let Some(start_at) = request.start_at {
            self.wait_for_start(start_at)?;
        }

        let detector = self.device.detector_size();
        let (width, height) = detector.binned(request.binning);
        let flat = &self.config.flat;
        let region = StatsRegion::for_binning(
            flat.stats_center_x,
            flat.stats_center_y,
            flat.stats_half_size,
            request.binning,
        );

        if !region.fits(width, height) {
            return Err(MultirunError::InvalidArgument(format!(
                "statistics box {:?} does not fit a {} x {} frame",
                region, width, height
            )));
        }

        let image = AcquiredImage::try_new(width, height)
            .ok_or(MultirunError::Allocation { width, height })?;
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(region.sample_count())
            .map_err(|_| MultirunError::Allocation {
                width: region.side(),
                height: region.side(),
            })?;

        self.session.set_status(ExposureStatus::Clear);
        self.read_idle_temperature();
        self.configure_device(request)?;

        // Unbinned detector geometry, not the binned frame size
        self.session.correction = TimeCorrection::new(
            detector.columns,
            detector.rows,
            self.session.shift_speeds,
            self.session.corrected_exposure,
        );
        debug!("Time correction {} ns", self.session.correction.nanoseconds);

        let ntp = ntp_drift_or_undefined(&self.config.ntp_drift_file);
        let polling = FramePolling {
            settle: self.config.sequencer.settle(),
            poll: self.config.sequencer.poll(),
            read_timeout: self.config.sequencer.read_timeout(),
        };

        info!(
            "Multirun of {} x {:.3} s ({:?}, binning {})",
            request.count, self.session.corrected_exposure, request.exposure_type, request.binning
        );

        let Sequencer { config, device, writer, allocator, session, handle, .. } = self;

        session.set_status(ExposureStatus::PreReadout);
        let mut frames = FrameSource::start(
            device.as_mut(),
            handle,
            image,
            request.count,
            session.corrected_exposure,
            polling,
        )?;

        let mut outcome = MultirunOutcome {
            corrected_exposure: session.corrected_exposure,
            ..Default::default()
        };

        while let Some(done_at) = frames.next_frame()? {
            session.set_status(ExposureStatus::Readout);
            session.image_index = frames.retrieved();

            let exposure_start = session.correction.exposure_start(done_at);
            let multirun_start = *session.multirun_start.get_or_insert(exposure_start);

            let median = region_median(&frames.image().data, width, &region, &mut samples)
                .unwrap_or_default();
            session.median = Some(median);
            outcome.median = Some(median);

            if request.flat && config.flat.needs_recalculation(median) {
                info!(
                    "Flat median {:.1} outside {}..{}, exposure needs recalculating",
                    median, config.flat.min_recalc_counts, config.flat.max_recalc_counts
                );
                frames.stop();
                outcome.recalculate = true;
                break;
            }

            if request.flat && !config.flat.should_save(median) {
                info!("Flat median {:.1} outside the save window, frame dropped", median);
                outcome.discarded += 1;
            } else {
                let new_multirun = outcome.saved.is_empty() && !request.continue_multirun;
                let filename =
                    allocator.next_filename(request.exposure_type, new_multirun, Utc::now())?;

                let metadata = FrameMetadata {
                    instrument: config.header.instrument.clone(),
                    telescope: config.header.telescope.clone(),
                    group_id: config.header.group_id.clone(),
                    proposal_id: config.header.proposal_id.clone(),
                    exposure_type: request.exposure_type.name().to_owned(),
                    multirun: filename.multirun,
                    run: filename.run,
                    window: filename.window,
                    image_index: session.image_index,
                    image_count: request.count,
                    binning: request.binning,
                    requested_exposure: session.requested_exposure,
                    corrected_exposure: session.corrected_exposure,
                    multirun_start,
                    exposure_start,
                    exposure_end: done_at,
                    median,
                    ccd_temperature: session.temperature,
                    horizontal_shift_speed: session.shift_speeds.horizontal,
                    vertical_shift_speed: session.shift_speeds.vertical,
                    ntp_time: ntp.time.clone(),
                    ntp_server: ntp.server.clone(),
                    ntp_drift: ntp.drift,
                };

                let path = write_locked(
                    writer.as_mut(),
                    &filename,
                    &config.storage.lock_extension,
                    frames.image(),
                    &metadata,
                )?;
                outcome.saved.push(path);
            }

            if request.flat && session.budget_exceeded() {
                info!("Flat session time budget spent after {:?}", session.elapsed);
                frames.stop();
                outcome.budget_exhausted = true;
                break;
            }
        }

        session.set_status(ExposureStatus::PostReadout);
        drop(frames);

        info!(
            "Multirun finished: {} saved, {} discarded{}",
            outcome.saved.len(),
            outcome.discarded,
            if outcome.recalculate { ", recalculation needed" } else { "" }
        );

        Ok(outcome)
    }
}

// =========================================== PRIVATE =============================================

impl Sequencer {
    fn wait_for_start(&mut self, start_at: Timestamp) -> Result<(), MultirunError> {
        self.session.set_status(ExposureStatus::WaitStart);
        info!("Waiting for start time {}", start_at);

        while Timestamp::now() < start_at {
            if self.handle.abort_requested() {
                return Err(MultirunError::Aborted);
            }
            sleep(self.config.sequencer.poll());
        }

        Ok(())
    }

    /// Temperature can only be read while idle, keep the last value otherwise.
    fn read_idle_temperature(&mut self) {
        match self.device.temperature() {
            Ok(temperature) => self.session.temperature = temperature,
            Err(error) => debug!(
                "Temperature unavailable ({}), keeping {:.1}",
                error, self.session.temperature
            ),
        }
    }

    fn configure_device(&mut self, request: &MultirunRequest) -> Result<(), MultirunError> {
        let device = self.device.as_mut();

        device
            .set_acquisition_mode(AcquisitionMode::RunTillAbort)
            .map_err(MultirunError::device("set acquisition mode"))?;
        device
            .set_frame_transfer(true)
            .map_err(MultirunError::device("set frame transfer"))?;
        device
            .set_binning(request.binning)
            .map_err(MultirunError::device("set binning"))?;
        device
            .set_exposure_time(request.exposure)
            .map_err(MultirunError::device("set exposure time"))?;
        device
            .set_accumulations(1)
            .map_err(MultirunError::device("set accumulations"))?;

        let horizontal = device
            .horizontal_shift_speeds()
            .map_err(MultirunError::device("query horizontal shift speeds"))?;
        let vertical = device
            .vertical_shift_speeds()
            .map_err(MultirunError::device("query vertical shift speeds"))?;

        let sequencer = &self.config.sequencer;
        let horizontal_index = choose_speed(&horizontal, sequencer.horizontal_speed_index)?;
        let vertical_index = choose_speed(&vertical, sequencer.vertical_speed_index)?;

        device
            .select_horizontal_shift_speed(horizontal_index)
            .map_err(MultirunError::device("select horizontal shift speed"))?;
        device
            .select_vertical_shift_speed(vertical_index)
            .map_err(MultirunError::device("select vertical shift speed"))?;

        let timings = device
            .acquisition_timings()
            .map_err(MultirunError::device("read acquisition timings"))?;

        self.session.shift_speeds = ShiftSpeeds {
            horizontal: horizontal[horizontal_index],
            vertical: vertical[vertical_index],
        };
        self.session.corrected_exposure = timings.exposure;

        debug!(
            "Exposure {:.3} s requested, {:.3} s applied, kinetic cycle {:.3} s, shift {:?}",
            request.exposure, timings.exposure, timings.kinetic, self.session.shift_speeds
        );

        Ok(())
    }
}

fn validate_request(request: &MultirunRequest) -> Result<(), MultirunError> {
    if request.count < 1 {
        return Err(MultirunError::InvalidArgument(String::from(
            "at least one image must be requested",
        )));
    }
    if Duration::try_from_secs_f64(request.exposure).is_err() {
        return Err(MultirunError::InvalidArgument(format!(
            "invalid exposure length {}",
            request.exposure
        )));
    }
    if request.binning < 1 {
        return Err(MultirunError::InvalidArgument(String::from("binning must be at least 1")));
    }
    Ok(())
}

/// Configured speed index, or the fastest speed (fewest microseconds per pixel).
fn choose_speed(speeds: &[f64], configured: Option<usize>) -> Result<usize, MultirunError> {
    match configured {
        Some(index) if index < speeds.len() => Ok(index),
        Some(index) => Err(MultirunError::InvalidArgument(format!(
            "shift speed index {} out of {} available",
            index,
            speeds.len()
        ))),
        None => speeds
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index)
            .ok_or(MultirunError::InvalidArgument(String::from(
                "device reports no shift speeds",
            ))),
    }
}
