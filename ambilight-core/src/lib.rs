//! Ambient lighting streams for media libraries.
//!
//! A stream is extracted once per video: every frame's screen border is cut
//! into zones, each zone is reduced to a single LED color, and the result is
//! written to a compact `AMb2` file. At playback time the file is decoded,
//! graded for the target strip and sent as raw UDP datagrams to any number of
//! WLED-style controllers, paced against the embedded frame timestamps.

pub mod color;
pub mod config;
pub mod control;
pub mod effects;
pub mod error;
pub mod extract;
pub mod playback;
pub mod stream;
pub mod transport;
pub mod zones;

pub use config::{ColorSettings, DeviceTarget, PlaybackSettings, DEFAULT_PORT};
pub use control::{CancelToken, Command, Mailbox};
pub use error::{AmbilightError, Result};
pub use extract::{extract_stream, ExtractOutcome, FrameExtractor, FrameSource};
pub use playback::{Player, SessionHandle};
pub use stream::{ColorFormat, Stream, StreamEncoder, StreamHeader};
pub use transport::{FrameSink, UdpSink};
pub use zones::{compute_zones, LedCounts, Zone};
