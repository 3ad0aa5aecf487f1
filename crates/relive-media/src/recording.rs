use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use relive_common::RecordingConfig;

use crate::segment::{RingStats, SegmentAccumulator, SegmentRing, Snapshot};
use crate::stream::{LiveStream, LiveSubscription};

type SharedRing = Arc<Mutex<SegmentRing>>;

fn lock_ring(ring: &SharedRing) -> MutexGuard<'_, SegmentRing> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only access to a recording buffer's segments.
///
/// Handed to the playback side so it can snapshot without owning the buffer.
#[derive(Debug, Clone)]
pub struct BufferReader {
    ring: SharedRing,
}

impl BufferReader {
    pub fn snapshot(&self) -> Snapshot {
        lock_ring(&self.ring).snapshot()
    }

    pub fn len(&self) -> usize {
        lock_ring(&self.ring).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_ring(&self.ring).is_empty()
    }

    pub fn stats(&self) -> RingStats {
        lock_ring(&self.ring).stats()
    }
}

struct CaptureHandle {
    stream_id: u64,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Continuously captures a live stream into a rolling window of segments.
///
/// Capture runs on its own task and never looks at what the viewer is doing;
/// the playback side only ever reads through [`BufferReader`].
pub struct RecordingBuffer {
    config: RecordingConfig,
    ring: SharedRing,
    capture: Option<CaptureHandle>,
}

impl RecordingBuffer {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            ring: Arc::new(Mutex::new(SegmentRing::new(config.segment_count))),
            config,
            capture: None,
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    pub fn reader(&self) -> BufferReader {
        BufferReader {
            ring: Arc::clone(&self.ring),
        }
    }

    /// Whether a capture task is running for this buffer.
    pub fn is_recording(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| !capture.task.is_finished())
    }

    /// Begin capturing `stream`. No-op if a capture is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, stream: &LiveStream) -> bool {
        if self.is_recording() {
            debug!(
                "recording already running for stream {}, ignoring start",
                self.capture.as_ref().map(|c| c.stream_id).unwrap_or_default()
            );
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(capture_loop(
            stream.subscribe_from_start(),
            Arc::clone(&self.ring),
            self.config.segment_duration(),
            stop_rx,
        ));
        info!(
            "recording stream {} into {} x {} ms segments (retention {:?})",
            stream.id(),
            self.config.segment_count,
            self.config.segment_duration_ms,
            self.config.retention()
        );
        self.capture = Some(CaptureHandle {
            stream_id: stream.id(),
            stop_tx,
            task,
        });
        true
    }

    /// Stop capturing. Buffered segments are kept. Safe to call at any time.
    pub fn stop(&mut self) {
        if let Some(capture) = self.capture.take() {
            // The task may already have exited on its own.
            let _ = capture.stop_tx.send(());
            info!("recording stopped for stream {}", capture.stream_id);
        }
    }

    /// Stop capturing and wait for the final partial segment to be sealed.
    pub async fn stop_and_flush(&mut self) {
        if let Some(capture) = self.capture.take() {
            let _ = capture.stop_tx.send(());
            if let Err(e) = capture.task.await {
                warn!("recording task ended abnormally: {}", e);
            }
            info!("recording stopped for stream {}", capture.stream_id);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        lock_ring(&self.ring).snapshot()
    }

    pub fn stats(&self) -> RingStats {
        lock_ring(&self.ring).stats()
    }
}

impl Drop for RecordingBuffer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn capture_loop(
    mut packets: LiveSubscription,
    ring: SharedRing,
    segment_duration: std::time::Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut pending = SegmentAccumulator::default();
    let mut interval_start = Instant::now();
    let mut ticker = time::interval_at(interval_start + segment_duration, segment_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                seal_pending(&ring, &mut pending, &mut interval_start);
                break;
            }
            _ = ticker.tick() => {
                seal_pending(&ring, &mut pending, &mut interval_start);
            }
            packet = packets.recv() => match packet {
                Ok(packet) => pending.push(&packet),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("recording fell behind the live stream, skipped {} packets", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    seal_pending(&ring, &mut pending, &mut interval_start);
                    debug!("live stream closed, recording task exiting");
                    break;
                }
            },
        }
    }
}

fn seal_pending(ring: &SharedRing, pending: &mut SegmentAccumulator, interval_start: &mut Instant) {
    let now = Instant::now();
    let elapsed = now.saturating_duration_since(*interval_start);
    *interval_start = now;
    if let Some(chunk) = pending.seal(elapsed) {
        let bytes = chunk.data.len();
        let mut ring = lock_ring(ring);
        let evicted = ring.push(chunk);
        debug!(
            "sealed segment ({} bytes), holding {} segments{}",
            bytes,
            ring.len(),
            if evicted.is_some() { ", evicted oldest" } else { "" }
        );
    }
}
