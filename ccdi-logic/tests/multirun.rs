use std::{
    fs,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use ccdi_common::{BinningLimits, FlatConfig};
use ccdi_imager_demo::{DemoCamera, SkyModel};
use ccdi_imager_interface::{
    AcquiredImage, FrameMetadata, ImageWriter, Timestamp, WriteError, WriteErrorKind,
};
use ccdi_logic::{
    lock_path, night_date, start_sequencer_thread, write_locked, ExposureStatus, ExposureType,
    FitsFilename, FlatSeriesRequest, MultirunRequest, Sequencer, SequencerCommand,
    SequencerConfig, SequencerReport, ServiceConfig,
};
use chrono::Utc;

// ============================================ HELPERS ============================================

#[derive(Clone, Debug)]
struct Written {
    path: PathBuf,
    metadata: FrameMetadata,
    locked: bool,
}

/// Creates empty files instead of FITS containers and remembers what it wrote.
#[derive(Clone, Default)]
struct RecordingWriter {
    written: Arc<Mutex<Vec<Written>>>,
    fail: bool,
}

impl RecordingWriter {
    fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    fn written(&self) -> Vec<Written> {
        self.written.lock().unwrap().clone()
    }
}

impl ImageWriter for RecordingWriter {
    fn write_image(
        &mut self,
        path: &Path,
        _image: &AcquiredImage,
        metadata: &FrameMetadata,
    ) -> Result<(), WriteError> {
        fs::write(path, b"").map_err(|err| WriteError::new(WriteErrorKind::Create, err.to_string()))?;

        if self.fail {
            return Err(WriteError::new(WriteErrorKind::Data, "disk full"));
        }

        self.written.lock().unwrap().push(Written {
            path: path.to_path_buf(),
            metadata: metadata.clone(),
            locked: lock_path(path, "lock").exists(),
        });
        Ok(())
    }
}

fn config(directory: &Path) -> Arc<ServiceConfig> {
    let mut config = ServiceConfig::default();
    config.storage.directory = directory.to_string_lossy().to_string();
    config.sequencer = SequencerConfig {
        settle_ms: 5,
        poll_ms: 2,
        read_timeout_ms: 2000,
        ..Default::default()
    };
    config.flat = FlatConfig {
        stats_half_size: 8,
        stats_center_x: 32,
        stats_center_y: 32,
        min_exposure_ms: 10,
        binning_limits: vec![BinningLimits {
            binning: 1,
            min_exposure_ms: 10,
            saturation_counts: 60000.0,
        }],
        retry_step_ms: 5,
        retry_ceiling_ms: 20,
        ..Default::default()
    };
    Arc::new(config)
}

fn camera(rate: f64) -> DemoCamera {
    DemoCamera::new()
        .with_detector(64, 64)
        .with_frame_period(Duration::from_millis(30))
        .with_sky(SkyModel { bias: 1000.0, rate, rate_factor: 1.0, noise: 0.0 })
}

fn sequencer(directory: &Path, camera: DemoCamera, writer: &RecordingWriter) -> Sequencer {
    Sequencer::new(config(directory), Box::new(camera), Box::new(writer.clone())).unwrap()
}

fn metadata() -> FrameMetadata {
    FrameMetadata {
        instrument: String::from("CCDI"),
        telescope: String::from("UNKNOWN"),
        group_id: String::from("UNKNOWN"),
        proposal_id: String::from("UNKNOWN"),
        exposure_type: String::from("EXPOSE"),
        multirun: 1,
        run: 1,
        window: 1,
        image_index: 1,
        image_count: 1,
        binning: 1,
        requested_exposure: 1.0,
        corrected_exposure: 1.0,
        multirun_start: Timestamp::new(1_792_368_000, 0),
        exposure_start: Timestamp::new(1_792_368_000, 0),
        exposure_end: Timestamp::new(1_792_368_001, 0),
        median: 1000.0,
        ccd_temperature: -60.0,
        horizontal_shift_speed: 0.1,
        vertical_shift_speed: 38.55,
        ntp_time: String::from("undefined"),
        ntp_server: String::from("undefined"),
        ntp_drift: -999.0,
    }
}

fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

// ============================================= TESTS =============================================

#[test]
fn multirun_saves_every_frame_in_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let outcome = sequencer.multirun(&MultirunRequest::new(0.1, 3)).unwrap();

    assert_eq!(outcome.saved.len(), 3);
    assert!(!outcome.recalculate);
    assert_eq!(outcome.corrected_exposure, 0.1);
    assert_eq!(outcome.median, Some(11000.0));

    let written = writer.written();
    let date = night_date(Utc::now());
    for (index, entry) in written.iter().enumerate() {
        let run = index as u32 + 1;
        assert!(entry.locked, "lock must be held while writing");
        assert_eq!(entry.metadata.multirun, 1);
        assert_eq!(entry.metadata.run, run);
        assert_eq!(entry.metadata.image_index, run);
        assert_eq!(entry.metadata.image_count, 3);
        assert_eq!(entry.metadata.exposure_type, "EXPOSE");
        assert_eq!(entry.metadata.multirun_start, written[0].metadata.exposure_start);
        assert!(entry.metadata.exposure_start < entry.metadata.exposure_end);
        assert_eq!(
            entry.path,
            dir.path().join(format!("c_e_{}_1_{}_1_0.fits", date, run))
        );
    }
    assert!(written[0].metadata.exposure_start < written[1].metadata.exposure_start);
    assert!(written[1].metadata.exposure_start < written[2].metadata.exposure_start);
    assert_eq!(written[0].metadata.ntp_drift, -999.0);

    assert!(file_names(dir.path()).iter().all(|name| !name.ends_with(".lock")));
    assert_eq!(sequencer.session().status, ExposureStatus::None);
    assert_eq!(sequencer.handle().images_read(), 3);
    assert_eq!(sequencer.last_error().unwrap_err().code(), 0);
}

#[test]
fn next_multirun_opens_a_new_number() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    sequencer.multirun(&MultirunRequest::new(0.05, 2)).unwrap();
    let request = MultirunRequest {
        exposure_type: ExposureType::Dark,
        ..MultirunRequest::new(0.05, 1)
    };
    let outcome = sequencer.multirun(&request).unwrap();

    let date = night_date(Utc::now());
    assert_eq!(outcome.saved, vec![dir.path().join(format!("c_d_{}_2_1_1_0.fits", date))]);
}

#[test]
fn continued_multirun_keeps_counting_runs() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    sequencer.multirun(&MultirunRequest::new(0.05, 2)).unwrap();
    let request = MultirunRequest { continue_multirun: true, ..MultirunRequest::new(0.05, 1) };
    sequencer.multirun(&request).unwrap();

    let last = writer.written().pop().unwrap();
    assert_eq!((last.metadata.multirun, last.metadata.run), (1, 3));
}

#[test]
fn transient_read_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer =
        sequencer(dir.path(), camera(100000.0).with_transient_failures(2), &writer);

    let outcome = sequencer.multirun(&MultirunRequest::new(0.05, 3)).unwrap();
    assert_eq!(outcome.saved.len(), 3);
}

#[test]
fn abort_from_another_thread_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0).stalled(), &writer);
    let handle = sequencer.handle();

    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        handle.abort();
    });

    let error = sequencer.multirun(&MultirunRequest::new(0.05, 3)).unwrap_err();
    aborter.join().unwrap();

    assert_eq!(error.code(), 5);
    assert_eq!(sequencer.last_error().unwrap().code(), 5);
    assert_eq!(sequencer.handle().status(), ExposureStatus::None);
    assert!(writer.written().is_empty());
}

#[test]
fn stalled_device_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut config = (*config(dir.path())).clone();
    config.sequencer.read_timeout_ms = 100;
    let mut sequencer = Sequencer::new(
        Arc::new(config),
        Box::new(camera(100000.0).stalled()),
        Box::new(writer.clone()),
    )
    .unwrap();

    let error = sequencer.multirun(&MultirunRequest::new(0.01, 1)).unwrap_err();
    assert_eq!(error.code(), 4);
    assert_eq!(sequencer.session().status, ExposureStatus::None);
}

#[test]
fn invalid_array_size_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer =
        sequencer(dir.path(), camera(100000.0).with_invalid_array_size(), &writer);

    let error = sequencer.multirun(&MultirunRequest::new(0.05, 2)).unwrap_err();
    assert_eq!(error.code(), 6);
    assert!(writer.written().is_empty());
}

#[test]
fn invalid_requests_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    assert_eq!(sequencer.multirun(&MultirunRequest::new(0.05, 0)).unwrap_err().code(), 1);

    // Statistics box of 17 pixels cannot fit a binned 8 x 8 frame
    let request = MultirunRequest { binning: 8, ..MultirunRequest::new(0.05, 1) };
    assert_eq!(sequencer.multirun(&request).unwrap_err().code(), 1);
}

#[test]
fn foreign_lock_blocks_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = RecordingWriter::default();
    let filename = FitsFilename {
        directory: dir.path().to_path_buf(),
        instrument: 'c',
        exposure_type: 'e',
        date: String::from("20261018"),
        multirun: 1,
        run: 1,
        window: 1,
        processing: 0,
        extension: String::from("fits"),
    };
    let target = filename.path();
    fs::write(lock_path(&target, "lock"), b"").unwrap();

    let image = AcquiredImage { width: 1, height: 1, data: vec![0] };
    let error = write_locked(&mut writer, &filename, "lock", &image, &metadata()).unwrap_err();

    assert_eq!(error.code(), 7);
    assert!(lock_path(&target, "lock").exists());
    assert!(!target.exists());
    assert!(writer.written().is_empty());
}

#[test]
fn stale_lock_file_counts_as_taken_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let date = night_date(Utc::now());
    fs::write(dir.path().join(format!("c_e_{}_1_1_1_0.lock", date)), b"").unwrap();

    let outcome = sequencer.multirun(&MultirunRequest::new(0.05, 1)).unwrap();
    assert_eq!(outcome.saved, vec![dir.path().join(format!("c_e_{}_2_1_1_0.fits", date))]);
}

#[test]
fn failed_write_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::failing();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let error = sequencer.multirun(&MultirunRequest::new(0.05, 1)).unwrap_err();
    assert_eq!(error.code(), 8);
    assert!(file_names(dir.path()).iter().all(|name| !name.ends_with(".lock")));
}

#[test]
fn bright_flat_asks_for_recalculation() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    // 1000 + 450000 * 0.12 = 55000 counts, above the recalculation window
    let mut sequencer = sequencer(dir.path(), camera(450000.0), &writer);

    let request = MultirunRequest {
        flat: true,
        exposure_type: ExposureType::SkyFlat,
        ..MultirunRequest::new(0.12, 3)
    };
    let outcome = sequencer.multirun(&request).unwrap();

    assert!(outcome.recalculate);
    assert!(outcome.saved.is_empty());
    assert_eq!(outcome.median, Some(55000.0));
    assert!(file_names(dir.path()).is_empty());
}

#[test]
fn flat_outside_save_window_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    // 1000 + 460000 * 0.1 = 47000 counts, recalculation not needed but not worth saving
    let mut sequencer = sequencer(dir.path(), camera(460000.0), &writer);

    let request = MultirunRequest { flat: true, ..MultirunRequest::new(0.1, 2) };
    let outcome = sequencer.multirun(&request).unwrap();

    assert!(!outcome.recalculate);
    assert_eq!(outcome.discarded, 2);
    assert!(outcome.saved.is_empty());
}

#[test]
fn flat_budget_ends_the_call_early() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(300000.0), &writer);

    let request = MultirunRequest {
        flat: true,
        max_duration: Some(Duration::from_millis(1)),
        ..MultirunRequest::new(0.1, 5)
    };
    let outcome = sequencer.multirun(&request).unwrap();

    assert!(outcome.budget_exhausted);
    assert_eq!(outcome.saved.len(), 1);
}

#[test]
fn flat_series_converges_on_target() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(450000.0), &writer);

    let outcome = sequencer
        .flat_series(&FlatSeriesRequest {
            count: 3,
            initial_exposure: 0.12,
            binning: 1,
            max_duration: None,
        })
        .unwrap();

    assert_eq!(outcome.saved.len(), 3);
    assert_eq!(outcome.recalculations, 1);
    assert!((outcome.exposure - 0.12 * 29000.0 / 54000.0).abs() < 1e-9);

    let written = writer.written();
    assert!(written.iter().all(|entry| entry.metadata.multirun == 1));
    assert_eq!(
        written.iter().map(|entry| entry.metadata.run).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(written.iter().all(|entry| entry.metadata.exposure_type == "SKYFLAT"));
    assert!(written.iter().all(|entry| (entry.metadata.median - 30000.0).abs() < 1.0));
}

#[test]
fn flat_series_waits_when_sky_is_too_dark() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    // 1000 + 400 * 0.5 = 1200 counts asks for 72.5 s, beyond the 60 s maximum
    let mut sequencer = sequencer(dir.path(), camera(400.0), &writer);

    let outcome = sequencer
        .flat_series(&FlatSeriesRequest {
            count: 2,
            initial_exposure: 0.5,
            binning: 1,
            max_duration: Some(Duration::from_millis(300)),
        })
        .unwrap();

    assert!(outcome.budget_exhausted);
    assert!(outcome.saved.is_empty());
    assert!(outcome.recalculations >= 1);
    assert_eq!(outcome.exposure, 0.5);
}

#[test]
fn sequencer_thread_reports_results() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let (command_tx, command_rx) = mpsc::channel();
    let (report_tx, report_rx) = mpsc::channel();
    let thread = start_sequencer_thread(sequencer, command_rx, report_tx).unwrap();

    command_tx.send(SequencerCommand::Multirun(MultirunRequest::new(0.05, 2))).unwrap();
    match report_rx.recv().unwrap() {
        SequencerReport::MultirunFinished(outcome) => assert_eq!(outcome.saved.len(), 2),
        other => panic!("unexpected report {:?}", other),
    }

    command_tx.send(SequencerCommand::Multirun(MultirunRequest::new(0.05, 0))).unwrap();
    match report_rx.recv().unwrap() {
        SequencerReport::Failed { code, .. } => assert_eq!(code, 1),
        other => panic!("unexpected report {:?}", other),
    }

    command_tx.send(SequencerCommand::Shutdown).unwrap();
    thread.join().unwrap();
}

#[test]
fn unrepresentable_exposure_is_an_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let (command_tx, command_rx) = mpsc::channel();
    let (report_tx, report_rx) = mpsc::channel();
    let thread = start_sequencer_thread(sequencer, command_rx, report_tx).unwrap();

    command_tx.send(SequencerCommand::Multirun(MultirunRequest::new(1e20, 1))).unwrap();
    match report_rx.recv().unwrap() {
        SequencerReport::Failed { code, .. } => assert_eq!(code, 1),
        other => panic!("unexpected report {:?}", other),
    }

    // The thread survived and still takes commands
    command_tx.send(SequencerCommand::Multirun(MultirunRequest::new(0.05, 1))).unwrap();
    match report_rx.recv().unwrap() {
        SequencerReport::MultirunFinished(outcome) => assert_eq!(outcome.saved.len(), 1),
        other => panic!("unexpected report {:?}", other),
    }

    command_tx.send(SequencerCommand::Shutdown).unwrap();
    thread.join().unwrap();
}

#[test]
fn continuing_in_an_empty_directory_opens_multirun_one() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut sequencer = sequencer(dir.path(), camera(100000.0), &writer);

    let request = MultirunRequest { continue_multirun: true, ..MultirunRequest::new(0.05, 2) };
    let outcome = sequencer.multirun(&request).unwrap();

    let date = night_date(Utc::now());
    assert_eq!(
        outcome.saved,
        vec![
            dir.path().join(format!("c_e_{}_1_1_1_0.fits", date)),
            dir.path().join(format!("c_e_{}_1_2_1_0.fits", date)),
        ]
    );
}

#[test]
fn abort_while_waiting_for_the_sky_ends_the_flat_series() {
    let dir = tempfile::tempdir().unwrap();
    let writer = RecordingWriter::default();
    let mut config = (*config(dir.path())).clone();
    config.flat.retry_ceiling_ms = 60000;
    // 1000 + 400 * 0.5 = 1200 counts asks for 72.5 s, so the series waits
    let mut sequencer = Sequencer::new(
        Arc::new(config),
        Box::new(camera(400.0)),
        Box::new(writer.clone()),
    )
    .unwrap();
    let handle = sequencer.handle();

    let aborter = thread::spawn({
        let handle = handle.clone();
        move || {
            thread::sleep(Duration::from_millis(300));
            handle.abort();
        }
    });

    let started = std::time::Instant::now();
    let error = sequencer
        .flat_series(&FlatSeriesRequest {
            count: 2,
            initial_exposure: 0.5,
            binning: 1,
            max_duration: None,
        })
        .unwrap_err();
    aborter.join().unwrap();

    assert_eq!(error.code(), 5);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(handle.status(), ExposureStatus::None);
    assert_eq!(sequencer.session().status, ExposureStatus::None);
    assert!(writer.written().is_empty());
}
