mod filename;
mod lock;
mod save;

use std::path::PathBuf;

use ccdi_imager_interface::{AcquiredImage, FrameMetadata, ImageWriter};
use log::info;

use crate::error::MultirunError;

pub use filename::*;
pub use lock::*;
pub use save::*;

// ============================================ PUBLIC =============================================

/// Write one frame to `filename` while holding its lock file.
///
/// The lock exists from before the container is created until after it is
/// closed and is removed on every path. A container the writer already
/// started is left on disk when the write fails.
pub fn write_locked(
    writer: &mut dyn ImageWriter,
    filename: &FitsFilename,
    lock_extension: &str,
    image: &AcquiredImage,
    metadata: &FrameMetadata,
) -> Result<PathBuf, MultirunError> {
    let path = filename.path();
    let lock = FileLock::acquire(&path, lock_extension)?;

    let written = writer
        .write_image(&path, image, metadata)
        .map_err(|source| MultirunError::Write { path: path.clone(), source });
    let released = lock.release();

    written?;
    released?;

    info!("Saved {}", path.display());
    Ok(path)
}
