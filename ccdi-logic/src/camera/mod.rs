mod flat;
mod frames;
mod sequencer;
mod session;

pub use flat::*;
pub use frames::*;
pub use sequencer::*;
pub use session::*;
