use std::{path::PathBuf, time::Duration};

use ccdi_common::FlatExposureError;
use ccdi_imager_interface::{DeviceError, WriteError};
use thiserror::Error;

// ============================================ PUBLIC =============================================

/// Failure of a multirun call. Callers branch on [`MultirunError::code`] and
/// show the `Display` message.
#[derive(Clone, PartialEq, Debug, Error)]
pub enum MultirunError {
    #[error("no error has occurred")]
    NoError,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not allocate a {width} x {height} image buffer")]
    Allocation { width: usize, height: usize },
    #[error("{context} failed: {source}")]
    Device {
        context: &'static str,
        source: DeviceError,
    },
    #[error("acquisition timed out, no image for {elapsed:?} (image {image})")]
    Timeout { elapsed: Duration, image: u32 },
    #[error("acquisition aborted")]
    Aborted,
    #[error("device reported an invalid image array size")]
    ArraySizeInvalid,
    #[error("could not create lock {}: {detail}", .path.display())]
    Lock { path: PathBuf, detail: String },
    #[error("could not write {}: {source}", .path.display())]
    Write { path: PathBuf, source: WriteError },
    #[error("could not scan directory {}: {detail}", .path.display())]
    Directory { path: PathBuf, detail: String },
    #[error(transparent)]
    Exposure(#[from] FlatExposureError),
    #[error("configuration: {0}")]
    Config(String),
}

impl MultirunError {
    pub fn code(&self) -> i32 {
        use MultirunError::*;

        match self {
            NoError => 0,
            InvalidArgument(_) => 1,
            Allocation { .. } => 2,
            Device { .. } => 3,
            Timeout { .. } => 4,
            Aborted => 5,
            ArraySizeInvalid => 6,
            Lock { .. } => 7,
            Write { .. } => 8,
            Directory { .. } => 9,
            Exposure(_) => 10,
            Config(_) => 11,
        }
    }

    pub(crate) fn device(context: &'static str) -> impl FnOnce(DeviceError) -> Self {
        move |source| match source {
            DeviceError::ArraySizeInvalid => MultirunError::ArraySizeInvalid,
            source => MultirunError::Device { context, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_size_device_error_gets_its_own_code() {
        let error = MultirunError::device("read image")(DeviceError::ArraySizeInvalid);
        assert_eq!(error, MultirunError::ArraySizeInvalid);
        assert_eq!(error.code(), 6);

        let error = MultirunError::device("start acquisition")(DeviceError::NotAcquiring);
        assert_eq!(error.code(), 3);
        assert_eq!(error.to_string(), "start acquisition failed: device not acquiring");
    }

    #[test]
    fn lock_message_names_the_path() {
        let error = MultirunError::Lock {
            path: PathBuf::from("/data/c_e_20261018_1_1_1_0.lock"),
            detail: String::from("exists"),
        };
        assert_eq!(error.code(), 7);
        assert!(error.to_string().contains("c_e_20261018_1_1_1_0.lock"));
    }
}
