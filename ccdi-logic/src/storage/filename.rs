use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Timelike, Utc};
use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::{error::MultirunError, StorageConfig};

// ============================================ PUBLIC =============================================

/// Placeholder for letter fields that are missing or malformed in a file name.
pub const UNKNOWN_CODE: char = 'X';

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ExposureType {
    Exposure,
    SkyFlat,
    Bias,
    Dark,
    Standard,
}

impl ExposureType {
    pub fn code(&self) -> char {
        match self {
            ExposureType::Exposure => 'e',
            ExposureType::SkyFlat => 'f',
            ExposureType::Bias => 'b',
            ExposureType::Dark => 'd',
            ExposureType::Standard => 's',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'e' => Some(ExposureType::Exposure),
            'f' => Some(ExposureType::SkyFlat),
            'b' => Some(ExposureType::Bias),
            'd' => Some(ExposureType::Dark),
            's' => Some(ExposureType::Standard),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExposureType::Exposure => "EXPOSE",
            ExposureType::SkyFlat => "SKYFLAT",
            ExposureType::Bias => "BIAS",
            ExposureType::Dark => "DARK",
            ExposureType::Standard => "STANDARD",
        }
    }
}

/// Every part of an output file name:
/// `{instrument}_{type}_{date}_{multirun}_{run}_{window}_{processing}.{extension}`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FitsFilename {
    pub directory: PathBuf,
    pub instrument: char,
    pub exposure_type: char,
    pub date: String,
    pub multirun: u32,
    pub run: u32,
    pub window: u32,
    pub processing: u32,
    pub extension: String,
}

impl FitsFilename {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}.{}",
            self.instrument,
            self.exposure_type,
            self.date,
            self.multirun,
            self.run,
            self.window,
            self.processing,
            self.extension
        )
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }
}

/// Fields recovered from a directory entry name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParsedFilename {
    pub instrument: char,
    pub exposure_type: char,
    pub date: String,
    pub multirun: u32,
    pub run: u32,
    pub window: u32,
    pub processing: u32,
}

/// Split a file name into its fields, missing or malformed ones become `X` / 0.
pub fn parse_filename(name: &str) -> ParsedFilename {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    let mut fields = stem.split('_');

    let mut letter = || {
        fields
            .next()
            .and_then(|field| field.chars().next())
            .unwrap_or(UNKNOWN_CODE)
    };
    let instrument = letter();
    let exposure_type = letter();

    let date = fields
        .next()
        .filter(|field| !field.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| UNKNOWN_CODE.to_string());

    let mut number = || {
        fields
            .next()
            .and_then(|field| field.parse::<u32>().ok())
            .unwrap_or(0)
    };
    let multirun = number();
    let run = number();
    let window = number();
    let processing = number();

    ParsedFilename {
        instrument,
        exposure_type,
        date,
        multirun,
        run,
        window,
        processing,
    }
}

/// Date of the start of the observing night; before noon UTC the night began
/// on the previous calendar day.
pub fn night_date(now: DateTime<Utc>) -> String {
    let night = match now.hour() < 12 {
        true => now - Duration::days(1),
        false => now,
    };

    night.format("%Y%m%d").to_string()
}

/// Highest `(multirun, run)` among names carrying `date`; the run is the
/// highest within the highest multirun. `(0, 0)` when nothing matches.
pub fn max_sequence<'a>(names: impl IntoIterator<Item = &'a str>, date: &str) -> (u32, u32) {
    let parsed: Vec<ParsedFilename> = names
        .into_iter()
        .filter(|name| !name.starts_with('.') && name.contains(date))
        .map(parse_filename)
        .collect();

    let max_multirun = parsed.iter().map(|entry| entry.multirun).max().unwrap_or(0);
    let max_run = parsed
        .iter()
        .filter(|entry| entry.multirun == max_multirun)
        .map(|entry| entry.run)
        .max()
        .unwrap_or(0);

    (max_multirun, max_run)
}

/// Derives the next file name from what is already in the output directory.
///
/// The scan and the later file creation are not atomic, a second process
/// allocating in the same directory at the same moment can pick the same name.
/// The writer refuses to overwrite, so such a collision fails instead of
/// destroying data.
#[derive(Clone, Debug)]
pub struct FilenameAllocator {
    directory: PathBuf,
    instrument: char,
    window: u32,
    processing: u32,
    extension: String,
}

impl FilenameAllocator {
    pub fn new(config: &StorageConfig) -> Result<Self, MultirunError> {
        let directory = config.directory_path().map_err(MultirunError::Config)?;

        fs::create_dir_all(&directory).map_err(|err| MultirunError::Directory {
            path: directory.clone(),
            detail: err.to_string(),
        })?;

        Ok(Self {
            directory,
            instrument: config.instrument_code,
            window: config.window,
            processing: config.processing_flag,
            extension: config.extension.clone(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn next_filename(
        &self,
        exposure_type: ExposureType,
        new_multirun: bool,
        now: DateTime<Utc>,
    ) -> Result<FitsFilename, MultirunError> {
        let date = night_date(now);
        let names = self.list_directory()?;
        let (max_multirun, max_run) = max_sequence(names.iter().map(String::as_str), &date);

        // Nothing to continue tonight, open multirun 1
        let (multirun, run) = match new_multirun || max_multirun == 0 {
            true => (max_multirun + 1, 1),
            false => (max_multirun, max_run + 1),
        };

        debug!(
            "Directory {} holds multirun {} run {} for {}, next {}/{}",
            self.directory.display(),
            max_multirun,
            max_run,
            date,
            multirun,
            run
        );

        Ok(FitsFilename {
            directory: self.directory.clone(),
            instrument: self.instrument,
            exposure_type: exposure_type.code(),
            date,
            multirun,
            run,
            window: self.window,
            processing: self.processing,
            extension: self.extension.clone(),
        })
    }
}

// =========================================== PRIVATE =============================================

impl FilenameAllocator {
    fn list_directory(&self) -> Result<Vec<String>, MultirunError> {
        let error = |detail: String| MultirunError::Directory {
            path: self.directory.clone(),
            detail,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(|err| error(err.to_string()))? {
            let entry = entry.map_err(|err| error(err.to_string()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        Ok(names)
    }
}

// ============================================= TESTS =============================================
