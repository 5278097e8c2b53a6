use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use ccdi_common::log_err;
use log::{debug, info};

use crate::{
    camera::{FlatSeriesOutcome, FlatSeriesRequest, MultirunOutcome, MultirunRequest, Sequencer},
    error::MultirunError,
};

// ============================================ PUBLIC =============================================

#[derive(Clone, PartialEq, Debug)]
pub enum SequencerCommand {
    Multirun(MultirunRequest),
    FlatSeries(FlatSeriesRequest),
    Shutdown,
}

#[derive(Clone, PartialEq, Debug)]
pub enum SequencerReport {
    MultirunFinished(MultirunOutcome),
    FlatSeriesFinished(FlatSeriesOutcome),
    Failed { code: i32, message: String },
}

impl From<MultirunError> for SequencerReport {
    fn from(error: MultirunError) -> Self {
        Self::Failed { code: error.code(), message: error.to_string() }
    }
}

/// Run `sequencer` on its own thread, one command at a time.
///
/// Abort a running command through a [`crate::SessionHandle`] taken before the
/// sequencer is moved in. The thread ends on [`SequencerCommand::Shutdown`] or
/// when the last command sender is dropped.
pub fn start_sequencer_thread(
    mut sequencer: Sequencer,
    command_rx: Receiver<SequencerCommand>,
    report_tx: Sender<SequencerReport>,
) -> Result<JoinHandle<()>, String> {
    thread::Builder::new()
        .name("sequencer".to_string())
        .spawn(move || loop {
            match command_rx.recv() {
                Ok(SequencerCommand::Shutdown) => {
                    info!("Sequencer thread shutting down");
                    return;
                }
                Ok(SequencerCommand::Multirun(request)) => {
                    debug!("Multirun requested: {:?}", request);
                    let report = sequencer
                        .multirun(&request)
                        .map(SequencerReport::MultirunFinished);
                    send_report(&report_tx, report);
                }
                Ok(SequencerCommand::FlatSeries(request)) => {
                    debug!("Flat series requested: {:?}", request);
                    let report = sequencer
                        .flat_series(&request)
                        .map(SequencerReport::FlatSeriesFinished);
                    send_report(&report_tx, report);
                }
                // Last sender disconnected - exit thread
                Err(_) => return,
            }
        })
        .map_err(|err| format!("{:?}", err))
}

// =========================================== PRIVATE =============================================

fn send_report(
    report_tx: &Sender<SequencerReport>,
    result: Result<SequencerReport, MultirunError>,
) {
    let report = result.unwrap_or_else(SequencerReport::from);
    log_err("Send sequencer report", report_tx.send(report));
}
