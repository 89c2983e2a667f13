pub mod driver;
pub mod engine;
pub mod playback;
pub mod traits;

pub use driver::{CallCommand, CallIo, run_call};
pub use engine::{CallDeps, CallEngine, CallEvent};
pub use playback::{PlaybackController, PlaybackId};
