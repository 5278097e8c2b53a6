use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::info;
use serde_derive::{Deserialize, Serialize};
use simple_expand_tilde::expand_tilde;

use ccdi_common::{read_text_file, save_text_file, to_string, FlatConfig};
use directories::ProjectDirs;

// ============================================ PUBLIC =============================================

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub flat: FlatConfig,
    pub sequencer: SequencerConfig,
    pub header: HeaderConfig,
    pub ntp_drift_file: String,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub directory: String,
    pub instrument_code: char,
    pub window: u32,
    pub processing_flag: u32,
    pub extension: String,
    pub lock_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: String::from("~/ccdi/data/"),
            instrument_code: 'c',
            window: 1,
            processing_flag: 0,
            extension: String::from("fits"),
            lock_extension: String::from("lock"),
        }
    }
}

impl StorageConfig {
    pub fn directory_path(&self) -> Result<PathBuf, String> {
        let path = PathBuf::from(&self.directory);
        if path.starts_with("~") {
            expand_tilde(&path).ok_or(format!("Could not expand {}", self.directory))
        } else {
            Ok(path)
        }
    }
}

/// Polling cadence of the acquisition loop, all values in milliseconds.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub settle_ms: u64,
    pub poll_ms: u64,
    pub read_timeout_ms: u64,
    /// Fastest speed when not set
    pub horizontal_speed_index: Option<usize>,
    /// Fastest speed when not set
    pub vertical_speed_index: Option<usize>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            poll_ms: 50,
            read_timeout_ms: 10000,
            horizontal_speed_index: None,
            vertical_speed_index: None,
        }
    }
}

impl SequencerConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    pub instrument: String,
    pub telescope: String,
    pub group_id: String,
    pub proposal_id: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            instrument: String::from("CCDI"),
            telescope: String::from("UNKNOWN"),
            group_id: String::from("UNKNOWN"),
            proposal_id: String::from("UNKNOWN"),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), String> {
        let flat = &self.flat;

        if !self.storage.instrument_code.is_ascii_alphanumeric() {
            return Err(format!("Invalid instrument code {:?}", self.storage.instrument_code));
        }
        if self.storage.extension.is_empty() || self.storage.lock_extension.is_empty() {
            return Err(String::from("File and lock extensions must not be empty"));
        }
        if self.storage.extension == self.storage.lock_extension {
            return Err(String::from("Lock extension must differ from the file extension"));
        }
        if flat.min_exposure_ms > flat.max_exposure_ms {
            return Err(format!(
                "Minimum exposure {} ms above maximum {} ms",
                flat.min_exposure_ms, flat.max_exposure_ms
            ));
        }
        if flat.min_recalc_counts > flat.max_recalc_counts
            || flat.min_save_counts > flat.max_save_counts
        {
            return Err(String::from("Flat count windows must have min <= max"));
        }
        if self.sequencer.poll_ms == 0 {
            return Err(String::from("Poll interval must be positive"));
        }

        Ok(())
    }
}

pub fn parse_config(text: &str) -> Result<ServiceConfig, String> {
    let config = serde_yaml::from_str::<ServiceConfig>(text).map_err(to_string)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<Arc<ServiceConfig>, String> {
    let res = parse_config(&read_text_file(path)?)
        .map_err(|err| format!("Could not load config file {}: {}", path_as_string(path), err))
        .map(Arc::new)?;

    info!(
        "Config storage: {}, flat target {} counts",
        res.storage.directory, res.flat.target_counts
    );

    Ok(res)
}

pub fn load_config_file() -> Result<Arc<ServiceConfig>, String> {
    load_config_from(config_file_path()?.as_path())
}

pub fn create_default_config_file() -> Result<String, String> {
    let config_yaml = serde_yaml::to_string(&<ServiceConfig as Default>::default())
        .map_err(to_string)?;

    let path = default_file_path()?;

    match save_text_file(&config_yaml, path.as_path()) {
        Ok(_) => Ok(path_as_string(&path)),
        Err(error) => Err(error)
    }
}

// =========================================== PRIVATE =============================================

fn path_as_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn config_file_path() -> Result<PathBuf, String> {
    create_file_path("config.yaml")
}

fn default_file_path() -> Result<PathBuf, String> {
    create_file_path("default.yaml")
}

fn create_file_path(file_name: &str) -> Result<PathBuf, String> {
    Ok(
        ProjectDirs::from("", "",  "ccdi")
            .ok_or(String::from("Could not determine config directory path"))?
            .config_dir()
            .to_path_buf()
            .join(file_name)
    )
}

// ============================================= TESTS =============================================
