mod helpers;
mod file;
mod flat;
mod stats;
mod timing;

pub use helpers::{to_string, log_err};
pub use file::*;
pub use flat::*;
pub use stats::*;
pub use timing::*;
