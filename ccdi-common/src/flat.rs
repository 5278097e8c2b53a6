use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

// ============================================ PUBLIC =============================================

/// Sky flat tuning parameters, loaded once with the service configuration.
///
/// Exposure lengths are configured in milliseconds; the accessors return seconds.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatConfig {
    pub target_counts: f64,
    pub min_save_counts: f64,
    pub max_save_counts: f64,
    pub min_recalc_counts: f64,
    pub max_recalc_counts: f64,
    pub bias_level: f64,
    pub stats_half_size: usize,
    pub stats_center_x: usize,
    pub stats_center_y: usize,
    pub min_exposure_ms: u64,
    pub max_exposure_ms: u64,
    pub binning_limits: Vec<BinningLimits>,
    pub saturated_exposure_ms: u64,
    pub near_bias_margin: f64,
    pub near_bias_exposure_ms: u64,
    pub retry_step_ms: u64,
    pub retry_ceiling_ms: u64,
}

/// Per binning guards: the shortest exposure the readout keeps up with and
/// the median above which the frame counts as saturated.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BinningLimits {
    pub binning: usize,
    pub min_exposure_ms: u64,
    pub saturation_counts: f64,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            target_counts: 30000.0,
            min_save_counts: 15000.0,
            max_save_counts: 45000.0,
            min_recalc_counts: 10000.0,
            max_recalc_counts: 50000.0,
            bias_level: 1000.0,
            stats_half_size: 50,
            stats_center_x: 512,
            stats_center_y: 512,
            min_exposure_ms: 1000,
            max_exposure_ms: 60000,
            binning_limits: vec![
                BinningLimits { binning: 1, min_exposure_ms: 100, saturation_counts: 60000.0 },
                BinningLimits { binning: 2, min_exposure_ms: 50, saturation_counts: 62000.0 },
            ],
            saturated_exposure_ms: 100,
            near_bias_margin: 100.0,
            near_bias_exposure_ms: 10000,
            retry_step_ms: 1000,
            retry_ceiling_ms: 15000,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Debug, Error)]
pub enum FlatExposureError {
    #[error("measured counts {counts} equal the bias level, exposure undefined")]
    CountsAtBias { counts: f64 },
    #[error("computed exposure {exposure} s is not a usable length")]
    InvalidExposure { exposure: f64 },
}

impl FlatConfig {
    pub fn min_exposure(&self) -> f64 {
        ms_to_seconds(self.min_exposure_ms)
    }

    pub fn max_exposure(&self) -> f64 {
        ms_to_seconds(self.max_exposure_ms)
    }

    pub fn saturated_exposure(&self) -> f64 {
        ms_to_seconds(self.saturated_exposure_ms)
    }

    pub fn near_bias_exposure(&self) -> f64 {
        ms_to_seconds(self.near_bias_exposure_ms)
    }

    /// Limits for the exact binning, else the closest smaller configured binning.
    pub fn limits_for(&self, binning: usize) -> BinningLimits {
        self.binning_limits
            .iter()
            .filter(|limits| limits.binning <= binning)
            .max_by_key(|limits| limits.binning)
            .cloned()
            .unwrap_or(BinningLimits {
                binning,
                min_exposure_ms: self.saturated_exposure_ms,
                saturation_counts: f64::from(u16::MAX),
            })
    }

    pub fn needs_recalculation(&self, median: f64) -> bool {
        median < self.min_recalc_counts || median > self.max_recalc_counts
    }

    pub fn should_save(&self, median: f64) -> bool {
        median >= self.min_save_counts && median <= self.max_save_counts
    }

    /// Whether the camera may be run at `exposure` seconds.
    pub fn in_operating_range(&self, exposure: f64) -> bool {
        exposure >= self.min_exposure() && exposure <= self.max_exposure()
    }

    /// Plain scaling towards the target, no guards applied.
    pub fn unclamped_exposure(
        &self,
        old_counts: f64,
        old_exposure: f64,
        binning: usize,
    ) -> Result<f64, FlatExposureError> {
        let signal = old_counts - self.bias_level;
        if signal == 0.0 || !signal.is_finite() {
            return Err(FlatExposureError::CountsAtBias { counts: old_counts });
        }

        Ok(old_exposure * (self.target_counts * binning as f64 - self.bias_level) / signal)
    }

    /// Next exposure length in seconds for a flat that measured `old_counts`.
    ///
    /// Saturated and near-bias frames get fixed lengths; otherwise the scaled
    /// length is raised to the binning floor.
    pub fn next_exposure(
        &self,
        old_counts: f64,
        old_exposure: f64,
        binning: usize,
    ) -> Result<f64, FlatExposureError> {
        let limits = self.limits_for(binning);

        if old_counts > limits.saturation_counts {
            return Ok(self.saturated_exposure());
        }

        if old_counts < self.bias_level + self.near_bias_margin {
            return Ok(self.near_bias_exposure());
        }

        let exposure = self.unclamped_exposure(old_counts, old_exposure, binning)?;
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(FlatExposureError::InvalidExposure { exposure });
        }

        Ok(exposure.max(ms_to_seconds(limits.min_exposure_ms)))
    }
}

// =========================================== PRIVATE =============================================

fn ms_to_seconds(milliseconds: u64) -> f64 {
    milliseconds as f64 / 1000.0
}

// ============================================= TESTS =============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FlatConfig {
        FlatConfig {
            target_counts: 30000.0,
            bias_level: 1000.0,
            near_bias_margin: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn formula_scales_towards_target() {
        let config = config();
        for (counts, exposure, binning) in [(5000.0, 2.0, 1), (40000.0, 8.0, 1), (20000.0, 1.5, 2)] {
            let expected =
                exposure * (30000.0 * binning as f64 - 1000.0) / (counts - 1000.0);
            let actual = config.unclamped_exposure(counts, exposure, binning).unwrap();
            assert!((actual - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn next_exposure_follows_formula_inside_guards() {
        let exposure = config().next_exposure(15500.0, 2.0, 1).unwrap();
        assert!((exposure - 2.0 * 29000.0 / 14500.0).abs() < 1e-9);
    }

    #[test]
    fn counts_equal_to_bias_are_rejected() {
        let config = FlatConfig { near_bias_margin: 0.0, ..config() };
        assert_eq!(
            config.unclamped_exposure(1000.0, 1.0, 1),
            Err(FlatExposureError::CountsAtBias { counts: 1000.0 })
        );
        assert!(config.next_exposure(1000.0, 1.0, 1).is_err());
    }

    #[test]
    fn saturation_forces_short_exposure() {
        let config = config();
        // Formula would ask for something longer than the saturated length
        assert_eq!(config.next_exposure(61000.0, 30.0, 1).unwrap(), 0.1);
        // Binning 2 has a higher watermark, so 61000 follows the formula
        let binned = config.next_exposure(61000.0, 30.0, 2).unwrap();
        assert!((binned - 30.0 * 59000.0 / 60000.0).abs() < 1e-9);
    }

    #[test]
    fn near_bias_forces_long_exposure() {
        let config = config();
        assert_eq!(config.next_exposure(1050.0, 0.01, 1).unwrap(), 10.0);
        assert_eq!(config.next_exposure(1000.0, 0.01, 1).unwrap(), 10.0);
        assert_eq!(config.next_exposure(900.0, 0.01, 1).unwrap(), 10.0);
    }

    #[test]
    fn short_result_is_raised_to_binning_floor() {
        let config = config();
        // 0.01 * 29000 / 49000 is far below the 100 ms floor of binning 1
        assert_eq!(config.next_exposure(50000.0, 0.01, 1).unwrap(), 0.1);
        assert_eq!(config.next_exposure(50000.0, 0.01, 2).unwrap(), 0.05);
        // Binning 3 falls back to the binning 2 limits
        assert_eq!(config.limits_for(3).binning, 2);
    }

    #[test]
    fn recalculation_and_save_windows() {
        let config = config();
        assert!(config.needs_recalculation(9999.0));
        assert!(config.needs_recalculation(50001.0));
        assert!(!config.needs_recalculation(30000.0));
        assert!(config.should_save(30000.0));
        assert!(!config.should_save(12000.0));
    }

    #[test]
    fn operating_range_in_seconds() {
        let config = config();
        assert!(config.in_operating_range(1.0));
        assert!(config.in_operating_range(60.0));
        assert!(!config.in_operating_range(0.5));
        assert!(!config.in_operating_range(61.0));
    }
}
