use serde_derive::{Deserialize, Serialize};

// ============================================ PUBLIC =============================================

/// Odd sized square box of pixels used as a quick brightness estimate.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StatsRegion {
    pub center_x: usize,
    pub center_y: usize,
    pub half_size: usize,
}

impl StatsRegion {
    /// Centre is configured in unbinned pixels and scaled down to the binned frame.
    pub fn for_binning(center_x: usize, center_y: usize, half_size: usize, binning: usize) -> Self {
        let binning = binning.max(1);
        Self {
            center_x: center_x / binning,
            center_y: center_y / binning,
            half_size,
        }
    }

    pub fn side(&self) -> usize {
        2 * self.half_size + 1
    }

    pub fn sample_count(&self) -> usize {
        self.side() * self.side()
    }

    /// Whether the box lies completely inside a `width` x `height` frame.
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.center_x >= self.half_size
            && self.center_y >= self.half_size
            && self.center_x + self.half_size < width
            && self.center_y + self.half_size < height
    }

    /// Copy the box out of a row-major frame into `out`.
    ///
    /// The caller guarantees the box fits, see [`StatsRegion::fits`]; a box
    /// running off the frame panics on slice indexing.
    pub fn extract_into(&self, image: &[u16], width: usize, out: &mut Vec<u16>) {
        out.clear();
        let first_row = self.center_y - self.half_size;

        for row in first_row..first_row + self.side() {
            let center = row * width + self.center_x;
            out.extend_from_slice(&image[center - self.half_size..=center + self.half_size]);
        }
    }
}

/// Median of the samples; the average of the two middle values for even counts.
///
/// Sorts `values` in place. Returns `None` for an empty slice.
pub fn median(values: &mut [u16]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    values.sort_unstable();
    let middle = values.len() / 2;

    Some(match values.len() % 2 {
        1 => values[middle] as f64,
        _ => (values[middle - 1] as f64 + values[middle] as f64) / 2.0,
    })
}

/// Median of the configured box of `image`, reusing `scratch` for the samples.
pub fn region_median(
    image: &[u16],
    width: usize,
    region: &StatsRegion,
    scratch: &mut Vec<u16>,
) -> Option<f64> {
    region.extract_into(image, width, scratch);
    median(scratch)
}

// ============================================= TESTS =============================================
