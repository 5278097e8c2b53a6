use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_derive::{Deserialize, Serialize};

// ============================================ PUBLIC =============================================

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Wall clock instant as seconds and nanoseconds since the Unix epoch.
///
/// `nanoseconds` is kept in `0..NANOS_PER_SECOND`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: i64) -> Self {
        Self { seconds, nanoseconds }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self {
                seconds: elapsed.as_secs() as i64,
                nanoseconds: elapsed.subsec_nanos() as i64,
            },
            // Clock set before 1970
            Err(_) => Self::default(),
        }
    }

    pub fn as_seconds_f64(&self) -> f64 {
        self.seconds as f64 + self.nanoseconds as f64 / NANOS_PER_SECOND as f64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}
