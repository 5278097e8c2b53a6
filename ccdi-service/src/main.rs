mod config;

use std::{fs::File, path::Path, process::ExitCode, sync::mpsc, time::Duration};

use ccdi_common::to_string;
use ccdi_imager_demo::DemoCamera;
use ccdi_logic::{
    create_default_config_file, load_config_file, load_config_from, start_sequencer_thread,
    ExposureType, FitsImageWriter, FlatSeriesRequest, MultirunRequest, Sequencer,
    SequencerCommand, SequencerReport,
};
use config::ServiceArgs;
use log::{error, info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

// ============================================ PUBLIC =============================================

fn main() -> ExitCode {
    let args: ServiceArgs = argh::from_env();

    if let Err(error) = init_logging(&args) {
        eprintln!("Could not initialize logging: {}", error);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            error!("{}", error);
            ExitCode::FAILURE
        }
    }
}

// =========================================== PRIVATE =============================================

fn init_logging(args: &ServiceArgs) -> Result<(), String> {
    let level = match args.debug {
        true => LevelFilter::Debug,
        false => LevelFilter::Info,
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = &args.log {
        let file = File::create(path).map_err(to_string)?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }

    CombinedLogger::init(loggers).map_err(to_string)
}

/// Returns the multirun error code as the process exit code.
fn run(args: ServiceArgs) -> Result<u8, String> {
    if args.create_default_config {
        let path = create_default_config_file()?;
        info!("Default config written to {}", path);
        return Ok(0);
    }

    let config = match &args.config {
        Some(path) => load_config_from(Path::new(path))?,
        None => load_config_file()?,
    };

    let command = command(&args)?;
    let sequencer = Sequencer::new(
        config,
        Box::new(DemoCamera::new()),
        Box::new(FitsImageWriter::new()),
    )
    .map_err(|err| err.to_string())?;

    let (command_tx, command_rx) = mpsc::channel();
    let (report_tx, report_rx) = mpsc::channel();
    let thread = start_sequencer_thread(sequencer, command_rx, report_tx)?;

    command_tx.send(command).map_err(to_string)?;
    let report = report_rx.recv().map_err(to_string)?;
    command_tx.send(SequencerCommand::Shutdown).map_err(to_string)?;
    thread.join().map_err(|_| String::from("Sequencer thread panicked"))?;

    Ok(match report {
        SequencerReport::MultirunFinished(outcome) => {
            info!(
                "Saved {} images, exposure {:.3} s{}",
                outcome.saved.len(),
                outcome.corrected_exposure,
                if outcome.recalculate { ", flat exposure needs recalculating" } else { "" }
            );
            0
        }
        SequencerReport::FlatSeriesFinished(outcome) => {
            info!(
                "Saved {} flats after {} recalculations, final exposure {:.3} s",
                outcome.saved.len(),
                outcome.recalculations,
                outcome.exposure
            );
            0
        }
        SequencerReport::Failed { code, message } => {
            error!("Acquisition failed ({}): {}", code, message);
            u8::try_from(code).unwrap_or(u8::MAX)
        }
    })
}

fn command(args: &ServiceArgs) -> Result<SequencerCommand, String> {
    let max_duration = args
        .max_duration
        .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(to_string))
        .transpose()?;

    if args.flat {
        return Ok(SequencerCommand::FlatSeries(FlatSeriesRequest {
            count: args.count,
            initial_exposure: args.exposure,
            binning: args.binning,
            max_duration,
        }));
    }

    let exposure_type = ExposureType::from_code(args.exposure_type)
        .ok_or(format!("Unknown exposure type {:?}", args.exposure_type))?;

    Ok(SequencerCommand::Multirun(MultirunRequest {
        binning: args.binning,
        exposure_type,
        max_duration,
        ..MultirunRequest::new(args.exposure, args.count)
    }))
}
