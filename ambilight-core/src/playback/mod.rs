//! Real-time playback: one paced loop per destination, fanned out from a
//! single session handle.

mod engine;
mod session;

pub use engine::{LoopStatus, PlaybackLoop, PlaybackOutcome, PlaybackState, SharedStatus, Tick};
pub use session::{Player, SessionHandle};
