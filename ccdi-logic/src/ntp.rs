use std::path::Path;

use ccdi_common::read_text_file;
use log::{debug, warn};

// ============================================ PUBLIC =============================================

pub const UNDEFINED: &str = "undefined";
pub const UNDEFINED_DRIFT: f64 = -999.0;

/// Last NTP check as written by the time keeping daemon.
#[derive(Clone, PartialEq, Debug)]
pub struct NtpDrift {
    pub time: String,
    pub server: String,
    /// Milliseconds
    pub drift: f64,
}

impl NtpDrift {
    pub fn undefined() -> Self {
        Self {
            time: String::from(UNDEFINED),
            server: String::from(UNDEFINED),
            drift: UNDEFINED_DRIFT,
        }
    }
}

/// Parse `time-server-drift`. The drift keeps its own sign since the line is
/// split at the first two dashes only.
pub fn parse_ntp_drift(line: &str) -> Result<NtpDrift, String> {
    let mut fields = line.trim().splitn(3, '-').map(str::trim);

    let time = fields.next().filter(|field| !field.is_empty());
    let server = fields.next().filter(|field| !field.is_empty());
    let drift = fields.next();

    match (time, server, drift) {
        (Some(time), Some(server), Some(drift)) => Ok(NtpDrift {
            time: time.to_owned(),
            server: server.to_owned(),
            drift: drift
                .parse::<f64>()
                .map_err(|err| format!("Invalid NTP drift {:?}: {}", drift, err))?,
        }),
        _ => Err(format!("Malformed NTP drift line {:?}", line)),
    }
}

pub fn read_ntp_drift(path: &Path) -> Result<NtpDrift, String> {
    let text = read_text_file(path)?;
    let line = text.lines().next().unwrap_or_default();
    parse_ntp_drift(line)
}

/// Drift from `path`, or the undefined sentinels when it cannot be read.
pub fn ntp_drift_or_undefined(path: &str) -> NtpDrift {
    if path.is_empty() {
        debug!("No NTP drift file configured");
        return NtpDrift::undefined();
    }

    match read_ntp_drift(Path::new(path)) {
        Ok(drift) => drift,
        Err(error) => {
            warn!("NTP drift unavailable: {}", error);
            NtpDrift::undefined()
        }
    }
}
