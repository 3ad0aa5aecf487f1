#![forbid(unsafe_code)]

//! Receiving end of a relive stream: relay signaling, WebRTC session
//! negotiation and the event loop that feeds the recording buffer and the
//! playback controller.

pub mod peer;
pub mod receiver;
pub mod session;
pub mod signaling;

pub use peer::{
    PeerEvent, PeerEventKind, PeerEventSink, PeerFactory, PeerState, PeerTransport, WebRtcPeer,
    WebRtcPeerFactory,
};
pub use receiver::Receiver;
pub use session::{SessionManager, SessionNotice, SessionState};
pub use signaling::{dispatch, SignalHandler, SignalSender, SignalingClient};
