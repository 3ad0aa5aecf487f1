use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::broadcast;

/// Packets a slow consumer may fall behind before it starts losing them.
pub const DEFAULT_STREAM_BACKLOG: usize = 1024;

/// One unit of incoming media as delivered by the peer transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub timestamp_us: u64,
    pub keyframe: bool,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn new(timestamp_us: u64, keyframe: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp_us,
            keyframe,
            payload: payload.into(),
        }
    }
}

/// Handle onto a session's incoming media.
///
/// Cloning is cheap. Every subscriber gets its own cursor, so the recorder and
/// the live view consume independently; a subscriber that lags behind loses
/// packets instead of stalling the producer.
///
/// The stream holds one cursor from its very first packet until somebody
/// claims it with [`LiveStream::subscribe_from_start`], so media produced
/// before the recorder attaches is not lost.
#[derive(Debug, Clone)]
pub struct LiveStream {
    id: u64,
    tx: broadcast::Sender<MediaPacket>,
    origin: Arc<Mutex<Option<LiveSubscription>>>,
}

pub type LiveSubscription = broadcast::Receiver<MediaPacket>;

impl LiveStream {
    pub fn new(id: u64) -> Self {
        Self::with_backlog(id, DEFAULT_STREAM_BACKLOG)
    }

    pub fn with_backlog(id: u64, backlog: usize) -> Self {
        let (tx, origin) = broadcast::channel(backlog.max(1));
        Self {
            id,
            tx,
            origin: Arc::new(Mutex::new(Some(origin))),
        }
    }

    /// Identifier of the session that produced this stream.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Push a packet to every current subscriber. Returns how many received it.
    ///
    /// Packets published before the first-packet cursor is claimed are kept
    /// for it, up to the backlog.
    pub fn publish(&self, packet: MediaPacket) -> usize {
        let held = usize::from(self.origin_held());
        self.tx.send(packet).map(|n| n - held).unwrap_or(0)
    }

    /// Subscribe from now on.
    pub fn subscribe(&self) -> LiveSubscription {
        self.tx.subscribe()
    }

    /// Subscribe from the first packet the stream ever carried.
    ///
    /// Only the first caller gets the backlog; later callers get a plain
    /// [`LiveStream::subscribe`].
    pub fn subscribe_from_start(&self) -> LiveSubscription {
        match self.lock_origin().take() {
            Some(origin) => origin,
            None => self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count() - usize::from(self.origin_held())
    }

    fn origin_held(&self) -> bool {
        self.lock_origin().is_some()
    }

    fn lock_origin(&self) -> MutexGuard<'_, Option<LiveSubscription>> {
        self.origin.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
