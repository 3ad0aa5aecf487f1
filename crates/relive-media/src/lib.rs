#![forbid(unsafe_code)]

//! Media side of the receiver: the live stream handle, the rolling recording
//! buffer fed from it, and the controller that switches the viewer between
//! live and buffered playback.

pub mod control;
pub mod playback;
pub mod recording;
pub mod segment;
pub mod sink;
pub mod stream;

pub use control::ViewerCommand;
pub use playback::{
    FrameDirection, PlaybackAsset, PlaybackController, PlaybackStatus, ViewMode, FRAME_INTERVAL,
    MAX_RATE, MIN_RATE, RATE_STEP, SEEK_STEP,
};
pub use recording::{BufferReader, RecordingBuffer};
pub use segment::{RingStats, Segment, SegmentRing, Snapshot};
pub use sink::{LoggingSink, ViewSink};
pub use stream::{LiveStream, LiveSubscription, MediaPacket};
