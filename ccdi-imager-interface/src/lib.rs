mod device;
mod time;
mod writer;

pub use device::*;
pub use time::*;
pub use writer::*;
