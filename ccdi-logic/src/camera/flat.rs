use std::{path::PathBuf, thread::sleep, time::Duration};

use log::{info, warn};

use crate::{
    camera::{MultirunRequest, Sequencer},
    error::MultirunError,
    storage::ExposureType,
};

// ============================================ PUBLIC =============================================

#[derive(Clone, PartialEq, Debug)]
pub struct FlatSeriesRequest {
    /// Number of flats to save
    pub count: u32,
    /// Seconds
    pub initial_exposure: f64,
    pub binning: usize,
    /// Whole series budget, unlimited when not set
    pub max_duration: Option<Duration>,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct FlatSeriesOutcome {
    pub saved: Vec<PathBuf>,
    /// Seconds, exposure the series ended with
    pub exposure: f64,
    pub recalculations: u32,
    pub budget_exhausted: bool,
}

impl Sequencer {
    /// Repeat flat multiruns, adapting the exposure to the sky, until
    /// `request.count` flats are saved or the time budget is spent.
    ///
    /// All flats of one series share a multirun number.
    pub fn flat_series(
        &mut self,
        request: &FlatSeriesRequest,
    ) -> Result<FlatSeriesOutcome, MultirunError> {
        self.session.begin(true, request.max_duration);
        self.handle.clear_abort();
        let result = self.run_flat_series(request);
        self.finish(result)
    }
}

// =========================================== PRIVATE =============================================

impl Sequencer {
    fn run_flat_series(
        &mut self,
        request: &FlatSeriesRequest,
    ) -> Result<FlatSeriesOutcome, MultirunError> {
        if request.count < 1 {
            return Err(MultirunError::InvalidArgument(String::from(
                "at least one flat must be requested",
            )));
        }

        let mut outcome = FlatSeriesOutcome {
            exposure: request.initial_exposure,
            ..Default::default()
        };

        while (outcome.saved.len() as u32) < request.count {
            if self.handle.abort_requested() {
                return Err(MultirunError::Aborted);
            }
            if self.session.budget_exceeded() {
                info!("Flat series out of time with {} flats", outcome.saved.len());
                outcome.budget_exhausted = true;
                break;
            }

            let call = MultirunRequest {
                binning: request.binning,
                exposure_type: ExposureType::SkyFlat,
                flat: true,
                continue_multirun: !outcome.saved.is_empty(),
                ..MultirunRequest::new(outcome.exposure, request.count - outcome.saved.len() as u32)
            };
            let run = self.run_multirun(&call)?;
            outcome.saved.extend(run.saved);

            if run.budget_exhausted {
                outcome.budget_exhausted = true;
                break;
            }

            if !run.recalculate && run.discarded == 0 {
                continue;
            }

            let Some(median) = run.median else {
                continue;
            };

            outcome.recalculations += 1;
            let next = self
                .config
                .flat
                .next_exposure(median, outcome.exposure, request.binning)?;

            if self.config.flat.in_operating_range(next) {
                info!(
                    "Flat exposure {:.3} s -> {:.3} s for median {:.1}",
                    outcome.exposure, next, median
                );
                outcome.exposure = next;
            } else {
                warn!(
                    "Flat exposure {:.3} s outside {:.3}..{:.3} s, waiting for the sky",
                    next,
                    self.config.flat.min_exposure(),
                    self.config.flat.max_exposure()
                );
                if !self.wait_for_sky()? {
                    outcome.budget_exhausted = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Wait in retry steps up to the retry ceiling. Returns `false` when the
    /// session budget ran out while waiting.
    fn wait_for_sky(&mut self) -> Result<bool, MultirunError> {
        let flat = &self.config.flat;
        let step = Duration::from_millis(flat.retry_step_ms);
        let ceiling = Duration::from_millis(flat.retry_ceiling_ms);
        let mut waited = Duration::ZERO;

        while waited < ceiling {
            sleep(step);
            waited += step;

            if self.handle.abort_requested() {
                return Err(MultirunError::Aborted);
            }
            if self.session.budget_exceeded() {
                return Ok(false);
            }
            if step.is_zero() {
                break;
            }
        }

        Ok(true)
    }
}
