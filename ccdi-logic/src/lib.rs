mod camera;
mod config;
mod error;
mod ntp;
mod storage;
mod thread;

pub use camera::*;
pub use config::*;
pub use error::*;
pub use ntp::*;
pub use storage::*;
pub use thread::*;
