//! Live/playback view switching and trick-play over buffered recordings.
//!
//! The controller never touches the recording buffer beyond taking snapshots,
//! so switching modes has no effect on capture.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info};

use relive_common::Error;

use crate::control::ViewerCommand;
use crate::recording::BufferReader;
use crate::segment::Snapshot;
use crate::sink::ViewSink;
use crate::stream::LiveStream;

pub const MIN_RATE: f64 = 0.25;
pub const MAX_RATE: f64 = 4.0;
pub const DEFAULT_RATE: f64 = 1.0;
/// Rate change applied by one speed-up / speed-down press.
pub const RATE_STEP: f64 = 0.5;
/// Distance covered by one seek-back / seek-forward press.
pub const SEEK_STEP: Duration = Duration::from_secs(5);
/// Nominal frame interval used for frame stepping (30 fps).
pub const FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Live,
    Playback,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Live => f.write_str("live"),
            ViewMode::Playback => f.write_str("playback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Forward,
    Backward,
}

/// A seekable, immutable recording built from one buffer snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackAsset {
    data: Bytes,
    duration: Duration,
    segment_count: usize,
    first_sequence: u64,
    last_sequence: u64,
}

impl PlaybackAsset {
    /// Concatenate the snapshot's segments in sequence order.
    pub fn materialize(snapshot: &Snapshot) -> relive_common::Result<Self> {
        let (Some(first), Some(last)) = (snapshot.segments().first(), snapshot.segments().last())
        else {
            return Err(Error::EmptyBuffer);
        };

        let mut data = BytesMut::with_capacity(snapshot.total_bytes());
        for segment in snapshot.iter() {
            data.extend_from_slice(&segment.data);
        }

        Ok(Self {
            data: data.freeze(),
            duration: snapshot.duration(),
            segment_count: snapshot.len(),
            first_sequence: first.sequence,
            last_sequence: last.sequence,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Sequence numbers of the first and last segment included.
    pub fn sequence_range(&self) -> (u64, u64) {
        (self.first_sequence, self.last_sequence)
    }
}

/// Position tracking for an asset: `anchor + elapsed * rate` while playing.
#[derive(Debug, Clone)]
struct PlaybackClock {
    anchor: Duration,
    started_at: Option<Instant>,
    rate: f64,
    limit: Duration,
}

impl PlaybackClock {
    fn new(limit: Duration) -> Self {
        Self {
            anchor: Duration::ZERO,
            started_at: None,
            rate: DEFAULT_RATE,
            limit,
        }
    }

    fn position(&self) -> Duration {
        let position = match self.started_at {
            Some(started) => self.anchor + scale(started.elapsed(), self.rate),
            None => self.anchor,
        };
        position.min(self.limit)
    }

    /// Running and not yet at the end of the asset.
    fn is_running(&self) -> bool {
        self.started_at.is_some() && self.position() < self.limit
    }

    /// A clock that ran into the end of the asset stops there.
    fn settle(&mut self) {
        if self.started_at.is_some() && self.position() >= self.limit {
            self.halt();
        }
    }

    fn resume(&mut self) {
        self.settle();
        if self.started_at.is_none() && self.anchor < self.limit {
            self.started_at = Some(Instant::now());
        }
    }

    fn halt(&mut self) {
        self.anchor = self.position();
        self.started_at = None;
    }

    fn set_rate(&mut self, rate: f64) {
        self.settle();
        self.reanchor(self.position());
        self.rate = rate;
    }

    fn seek(&mut self, position: Duration) {
        self.settle();
        self.reanchor(position.min(self.limit));
    }

    fn reanchor(&mut self, position: Duration) {
        self.anchor = position;
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }
}

fn scale(elapsed: Duration, rate: f64) -> Duration {
    Duration::from_nanos((elapsed.as_nanos() as f64 * rate).round() as u64)
}

/// Point-in-time view of the controller, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub mode: ViewMode,
    pub playing: bool,
    pub rate: f64,
    pub position: Duration,
    /// Length of the loaded asset. `None` in live mode.
    pub duration: Option<Duration>,
    pub live_available: bool,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(duration) => write!(
                f,
                "{} {} at {:.2}x, {:.3}s / {:.3}s",
                self.mode,
                if self.playing { "playing" } else { "paused" },
                self.rate,
                self.position.as_secs_f64(),
                duration.as_secs_f64()
            ),
            None => write!(
                f,
                "{} {}{}",
                self.mode,
                if self.playing { "playing" } else { "paused" },
                if self.live_available { "" } else { " (no live view available)" }
            ),
        }
    }
}

struct LoadedAsset {
    asset: Arc<PlaybackAsset>,
    clock: PlaybackClock,
}

/// Owns the view mode and decides what the sink renders.
pub struct PlaybackController<S: ViewSink> {
    sink: S,
    buffer: BufferReader,
    live: Option<LiveStream>,
    mode: ViewMode,
    loaded: Option<LoadedAsset>,
    live_playing: bool,
}

impl<S: ViewSink> PlaybackController<S> {
    pub fn new(buffer: BufferReader, sink: S) -> Self {
        Self {
            sink,
            buffer,
            live: None,
            mode: ViewMode::Live,
            loaded: None,
            live_playing: true,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn asset(&self) -> Option<&Arc<PlaybackAsset>> {
        self.loaded.as_ref().map(|loaded| &loaded.asset)
    }

    pub fn has_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn is_playing(&self) -> bool {
        match (&self.mode, &self.loaded) {
            (ViewMode::Playback, Some(loaded)) => loaded.clock.is_running(),
            _ => self.live_playing,
        }
    }

    pub fn rate(&self) -> f64 {
        match (&self.mode, &self.loaded) {
            (ViewMode::Playback, Some(loaded)) => loaded.clock.rate,
            _ => DEFAULT_RATE,
        }
    }

    /// Current position within the loaded asset. Zero in live mode.
    pub fn position(&self) -> Duration {
        match (&self.mode, &self.loaded) {
            (ViewMode::Playback, Some(loaded)) => loaded.clock.position(),
            _ => Duration::ZERO,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            mode: self.mode,
            playing: self.is_playing(),
            rate: self.rate(),
            position: self.position(),
            duration: match self.mode {
                ViewMode::Playback => self.loaded.as_ref().map(|l| l.asset.duration()),
                ViewMode::Live => None,
            },
            live_available: self.live.is_some(),
        }
    }

    /// A session published its live stream.
    ///
    /// Shown immediately in live mode; in playback mode it is kept for the
    /// next return to live.
    pub fn attach_live(&mut self, stream: LiveStream) -> Result<()> {
        info!("live stream {} available", stream.id());
        if self.mode == ViewMode::Live {
            self.sink.show_live(&stream)?;
            self.sink.set_playing(self.live_playing)?;
        }
        self.live = Some(stream);
        Ok(())
    }

    /// The session that produced the live stream is gone.
    pub fn detach_live(&mut self) -> Result<()> {
        if let Some(stream) = self.live.take() {
            info!("live stream {} no longer available", stream.id());
            if self.mode == ViewMode::Live {
                self.sink.show_nothing()?;
            }
        }
        Ok(())
    }

    /// Switch to a recording of everything currently buffered.
    ///
    /// Silently does nothing when the buffer is empty. Calling it again while
    /// already in playback takes a fresh snapshot.
    pub fn enter_playback(&mut self) -> Result<()> {
        let snapshot = self.buffer.snapshot();
        let asset = match PlaybackAsset::materialize(&snapshot) {
            Ok(asset) => asset,
            Err(e) => {
                debug!("{}, staying in {} mode", e, self.mode);
                return Ok(());
            }
        };
        let asset = Arc::new(asset);
        let (first, last) = asset.sequence_range();
        info!(
            "entering playback: segments {}..={} ({:?}, {} bytes)",
            first,
            last,
            asset.duration(),
            asset.len()
        );

        let mut clock = PlaybackClock::new(asset.duration());
        self.sink.show_asset(&asset, Duration::ZERO)?;
        self.sink.set_rate(DEFAULT_RATE)?;
        self.sink.set_playing(true)?;
        clock.resume();

        self.loaded = Some(LoadedAsset { asset, clock });
        self.mode = ViewMode::Playback;
        Ok(())
    }

    /// Switch back to the live stream and discard the loaded recording.
    ///
    /// No-op in live mode or when no live stream is available.
    pub fn return_to_live(&mut self) -> Result<()> {
        if self.mode == ViewMode::Live {
            return Ok(());
        }
        let Some(stream) = self.live.as_ref() else {
            debug!("no live stream to return to, staying in playback");
            return Ok(());
        };

        self.sink.show_live(stream)?;
        self.sink.set_rate(DEFAULT_RATE)?;
        self.sink.set_playing(self.live_playing)?;
        self.loaded = None;
        self.mode = ViewMode::Live;
        info!("returned to live stream {}", stream.id());
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.set_playing(true)
    }

    /// In live mode this only freezes the view; the stream keeps flowing.
    pub fn pause(&mut self) -> Result<()> {
        self.set_playing(false)
    }

    fn set_playing(&mut self, playing: bool) -> Result<()> {
        let playing = match (self.mode, self.loaded.as_mut()) {
            (ViewMode::Playback, Some(loaded)) => {
                if playing {
                    loaded.clock.resume();
                } else {
                    loaded.clock.halt();
                }
                loaded.clock.is_running()
            }
            _ => {
                self.live_playing = playing;
                playing
            }
        };
        self.sink.set_playing(playing)
    }

    /// Adjust the playback rate by `delta`, clamped to `[MIN_RATE, MAX_RATE]`.
    ///
    /// Ignored in live mode.
    pub fn set_rate(&mut self, delta: f64) -> Result<()> {
        let Some(loaded) = self.playback_asset() else {
            return Ok(());
        };
        if !delta.is_finite() {
            return Ok(());
        }
        let rate = (loaded.clock.rate + delta).clamp(MIN_RATE, MAX_RATE);
        if rate == loaded.clock.rate {
            return Ok(());
        }
        loaded.clock.set_rate(rate);
        debug!("playback rate {:.2}x", rate);
        self.sink.set_rate(rate)
    }

    pub fn speed_up(&mut self) -> Result<()> {
        self.set_rate(RATE_STEP)
    }

    pub fn speed_down(&mut self) -> Result<()> {
        self.set_rate(-RATE_STEP)
    }

    /// Move the position by `delta_secs`, clamped to the asset. Playback only.
    pub fn seek_relative(&mut self, delta_secs: f64) -> Result<()> {
        let Some(loaded) = self.playback_asset() else {
            return Ok(());
        };
        if !delta_secs.is_finite() {
            return Ok(());
        }
        let current = loaded.clock.position();
        let offset = Duration::try_from_secs_f64(delta_secs.abs()).unwrap_or(Duration::MAX);
        let target = if delta_secs >= 0.0 {
            current.saturating_add(offset)
        } else {
            current.saturating_sub(offset)
        };
        loaded.clock.seek(target);
        let position = loaded.clock.position();
        debug!("seek to {:?}", position);
        self.sink.seek(position)
    }

    /// Pause, then move one nominal frame. Playback only.
    pub fn step_frame(&mut self, direction: FrameDirection) -> Result<()> {
        let Some(loaded) = self.playback_asset() else {
            return Ok(());
        };
        let was_running = loaded.clock.is_running();
        loaded.clock.halt();
        let current = loaded.clock.position();
        let target = match direction {
            FrameDirection::Forward => current.saturating_add(FRAME_INTERVAL),
            FrameDirection::Backward => current.saturating_sub(FRAME_INTERVAL),
        };
        loaded.clock.seek(target);
        let position = loaded.clock.position();

        if was_running {
            self.sink.set_playing(false)?;
        }
        self.sink.seek(position)
    }

    /// Run one viewer control.
    pub fn apply(&mut self, command: ViewerCommand) -> Result<()> {
        debug!("viewer command: {}", command);
        match command {
            ViewerCommand::Play => self.play(),
            ViewerCommand::Pause => self.pause(),
            ViewerCommand::SpeedUp => self.speed_up(),
            ViewerCommand::SpeedDown => self.speed_down(),
            ViewerCommand::SeekBack => self.seek_relative(-SEEK_STEP.as_secs_f64()),
            ViewerCommand::SeekForward => self.seek_relative(SEEK_STEP.as_secs_f64()),
            ViewerCommand::FrameNext => self.step_frame(FrameDirection::Forward),
            ViewerCommand::FramePrev => self.step_frame(FrameDirection::Backward),
            ViewerCommand::EnterPlayback => self.enter_playback(),
            ViewerCommand::ReturnToLive => self.return_to_live(),
        }
    }

    fn playback_asset(&mut self) -> Option<&mut LoadedAsset> {
        match self.mode {
            ViewMode::Playback => self.loaded.as_mut(),
            ViewMode::Live => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBuffer;
    use crate::stream::MediaPacket;
    use relive_common::RecordingConfig;
    use tokio::time;

    #[derive(Debug, Clone, PartialEq)]
    enum SinkCall {
        Live(u64),
        Asset(usize),
        Nothing,
        Playing(bool),
        Rate(f64),
        Seek(Duration),
    }

    #[derive(Debug, Default)]
    struct TestSink {
        calls: Vec<SinkCall>,
    }

    impl ViewSink for TestSink {
        fn show_live(&mut self, stream: &LiveStream) -> Result<()> {
            self.calls.push(SinkCall::Live(stream.id()));
            Ok(())
        }

        fn show_asset(&mut self, asset: &Arc<PlaybackAsset>, _position: Duration) -> Result<()> {
            self.calls.push(SinkCall::Asset(asset.segment_count()));
            Ok(())
        }

        fn show_nothing(&mut self) -> Result<()> {
            self.calls.push(SinkCall::Nothing);
            Ok(())
        }

        fn set_playing(&mut self, playing: bool) -> Result<()> {
            self.calls.push(SinkCall::Playing(playing));
            Ok(())
        }

        fn set_rate(&mut self, rate: f64) -> Result<()> {
            self.calls.push(SinkCall::Rate(rate));
            Ok(())
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            self.calls.push(SinkCall::Seek(position));
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    /// Record `segments` half-second segments, then stop capture.
    async fn recorded(segments: u8) -> RecordingBuffer {
        let stream = LiveStream::new(9);
        let mut buffer = RecordingBuffer::new(RecordingConfig {
            segment_count: 100,
            segment_duration_ms: 500,
        });
        buffer.start(&stream);
        settle().await;
        for n in 0..segments {
            stream.publish(MediaPacket::new(n as u64, n == 0, vec![n; 10]));
            settle().await;
            time::advance(Duration::from_millis(500)).await;
            settle().await;
        }
        buffer.stop_and_flush().await;
        buffer
    }

    fn controller(buffer: &RecordingBuffer) -> PlaybackController<TestSink> {
        PlaybackController::new(buffer.reader(), TestSink::default())
    }

    #[test]
    fn test_materialize_concatenates_in_order() {
        let mut ring = crate::segment::SegmentRing::new(4);
        for tag in 1..=3u8 {
            ring.push(crate::segment::SealedChunk {
                duration: Duration::from_millis(500),
                packet_count: 1,
                keyframe: tag == 1,
                data: Bytes::from(vec![tag; 2]),
            });
        }
        let asset = PlaybackAsset::materialize(&ring.snapshot()).unwrap();
        assert_eq!(&asset.data()[..], &[1, 1, 2, 2, 3, 3]);
        assert_eq!(asset.duration(), Duration::from_millis(1500));
        assert_eq!(asset.segment_count(), 3);
        assert_eq!(asset.sequence_range(), (1, 3));

        assert!(matches!(
            PlaybackAsset::materialize(&Snapshot::default()),
            Err(Error::EmptyBuffer)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_playback_with_empty_buffer_stays_live() {
        let buffer = recorded(0).await;
        let mut ctl = controller(&buffer);

        ctl.enter_playback().unwrap();

        assert_eq!(ctl.mode(), ViewMode::Live);
        assert!(ctl.asset().is_none());
        assert!(ctl.sink().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_playback_starts_at_zero_playing() {
        let buffer = recorded(4).await;
        let mut ctl = controller(&buffer);

        ctl.enter_playback().unwrap();

        assert_eq!(ctl.mode(), ViewMode::Playback);
        assert_eq!(ctl.asset().unwrap().duration(), Duration::from_secs(2));
        assert_eq!(ctl.position(), Duration::ZERO);
        assert!(ctl.is_playing());
        assert_eq!(
            ctl.sink().calls,
            vec![SinkCall::Asset(4), SinkCall::Rate(1.0), SinkCall::Playing(true)]
        );

        time::advance(Duration::from_millis(700)).await;
        assert_eq!(ctl.position(), Duration::from_millis(700));

        // Position stops at the end of the asset.
        time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctl.position(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_saturates_at_both_bounds() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        assert_eq!(ctl.rate(), 1.0);

        for _ in 0..10 {
            ctl.speed_up().unwrap();
        }
        assert_eq!(ctl.rate(), MAX_RATE);

        for _ in 0..10 {
            ctl.speed_down().unwrap();
        }
        assert_eq!(ctl.rate(), MIN_RATE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_scales_position() {
        let buffer = recorded(8).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();

        time::advance(Duration::from_secs(1)).await;
        ctl.speed_up().unwrap();
        ctl.speed_up().unwrap();
        assert_eq!(ctl.rate(), 2.0);
        time::advance(Duration::from_secs(1)).await;

        assert_eq!(ctl.position(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_mode_ignores_trick_play() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);

        ctl.speed_up().unwrap();
        ctl.seek_relative(3.0).unwrap();
        ctl.step_frame(FrameDirection::Forward).unwrap();
        ctl.return_to_live().unwrap();

        assert_eq!(ctl.mode(), ViewMode::Live);
        assert_eq!(ctl.rate(), 1.0);
        assert_eq!(ctl.position(), Duration::ZERO);
        assert!(ctl.is_playing());
        assert!(ctl.sink().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_pause_freezes_view_only() {
        let buffer = recorded(1).await;
        let mut ctl = controller(&buffer);
        ctl.attach_live(LiveStream::new(3)).unwrap();

        ctl.pause().unwrap();
        assert!(!ctl.is_playing());
        assert_eq!(ctl.mode(), ViewMode::Live);
        assert_eq!(ctl.sink().calls.last(), Some(&SinkCall::Playing(false)));

        ctl.play().unwrap();
        assert!(ctl.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_is_clamped_to_asset() {
        let buffer = recorded(4).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        ctl.pause().unwrap();

        ctl.seek_relative(1.5).unwrap();
        assert_eq!(ctl.position(), Duration::from_millis(1500));

        ctl.apply(ViewerCommand::SeekForward).unwrap();
        assert_eq!(ctl.position(), Duration::from_secs(2));

        ctl.apply(ViewerCommand::SeekBack).unwrap();
        assert_eq!(ctl.position(), Duration::ZERO);

        ctl.seek_relative(f64::NAN).unwrap();
        assert_eq!(ctl.position(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_seek_saturates_at_asset_bounds() {
        let buffer = recorded(4).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        ctl.pause().unwrap();

        ctl.seek_relative(1e30).unwrap();
        assert_eq!(ctl.position(), Duration::from_secs(2));
        assert_eq!(ctl.sink().calls.last(), Some(&SinkCall::Seek(Duration::from_secs(2))));

        ctl.seek_relative(-1e30).unwrap();
        assert_eq!(ctl.position(), Duration::ZERO);
        assert_eq!(ctl.sink().calls.last(), Some(&SinkCall::Seek(Duration::ZERO)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_stops_at_end_of_asset() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        assert!(ctl.is_playing());

        time::advance(Duration::from_secs(5)).await;
        assert!(!ctl.is_playing());
        assert_eq!(ctl.position(), Duration::from_secs(1));
        assert_eq!(ctl.status().to_string(), "playback paused at 1.00x, 1.000s / 1.000s");

        // Play at the end stays paused there.
        ctl.play().unwrap();
        assert!(!ctl.is_playing());
        assert_eq!(ctl.sink().calls.last(), Some(&SinkCall::Playing(false)));

        // Seeking back from the end does not restart on its own.
        ctl.seek_relative(-0.5).unwrap();
        assert!(!ctl.is_playing());
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(ctl.position(), Duration::from_millis(500));

        ctl.play().unwrap();
        assert!(ctl.is_playing());
        time::advance(Duration::from_millis(250)).await;
        assert_eq!(ctl.position(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_step_pauses_and_moves_one_frame() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        assert!(ctl.is_playing());

        ctl.apply(ViewerCommand::FrameNext).unwrap();
        assert!(!ctl.is_playing());
        assert_eq!(ctl.position(), FRAME_INTERVAL);

        // Paused: time passing does not move the position.
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(ctl.position(), FRAME_INTERVAL);

        ctl.apply(ViewerCommand::FramePrev).unwrap();
        ctl.apply(ViewerCommand::FramePrev).unwrap();
        assert_eq!(ctl.position(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_step_clamps_at_asset_end() {
        let buffer = recorded(1).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        ctl.seek_relative(10.0).unwrap();

        ctl.step_frame(FrameDirection::Forward).unwrap();
        assert_eq!(ctl.position(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_to_live_discards_asset() {
        let buffer = recorded(3).await;
        let mut ctl = controller(&buffer);
        ctl.attach_live(LiveStream::new(5)).unwrap();
        ctl.enter_playback().unwrap();
        ctl.speed_up().unwrap();

        ctl.return_to_live().unwrap();

        assert_eq!(ctl.mode(), ViewMode::Live);
        assert!(ctl.asset().is_none());
        assert_eq!(ctl.rate(), 1.0);
        assert_eq!(ctl.sink().calls.iter().filter(|c| **c == SinkCall::Live(5)).count(), 2);
        assert_eq!(buffer.snapshot().len(), 3);

        // Second return is a no-op.
        let calls = ctl.sink().calls.len();
        ctl.return_to_live().unwrap();
        assert_eq!(ctl.sink().calls.len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_to_live_without_stream_stays_in_playback() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();

        ctl.apply(ViewerCommand::ReturnToLive).unwrap();
        assert_eq!(ctl.mode(), ViewMode::Playback);
        assert!(ctl.asset().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_arriving_during_playback_is_kept_for_later() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();

        ctl.attach_live(LiveStream::new(11)).unwrap();
        assert!(!ctl.sink().calls.contains(&SinkCall::Live(11)));
        assert!(ctl.has_live());

        ctl.return_to_live().unwrap();
        assert!(ctl.sink().calls.contains(&SinkCall::Live(11)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_live_shows_nothing_in_live_mode() {
        let buffer = recorded(0).await;
        let mut ctl = controller(&buffer);
        ctl.attach_live(LiveStream::new(2)).unwrap();

        ctl.detach_live().unwrap();
        assert!(!ctl.has_live());
        assert_eq!(ctl.sink().calls.last(), Some(&SinkCall::Nothing));
        assert!(ctl.status().to_string().contains("no live view available"));

        // Detaching twice does nothing more.
        let calls = ctl.sink().calls.len();
        ctl.detach_live().unwrap();
        assert_eq!(ctl.sink().calls.len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_playback_twice_resnapshots() {
        let stream = LiveStream::new(1);
        let mut buffer = RecordingBuffer::new(RecordingConfig {
            segment_count: 10,
            segment_duration_ms: 500,
        });
        buffer.start(&stream);
        settle().await;
        stream.publish(MediaPacket::new(0, true, vec![1u8]));
        settle().await;
        time::advance(Duration::from_millis(500)).await;
        settle().await;

        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        ctl.seek_relative(0.25).unwrap();
        assert_eq!(ctl.asset().unwrap().segment_count(), 1);

        stream.publish(MediaPacket::new(1, false, vec![2u8]));
        settle().await;
        time::advance(Duration::from_millis(500)).await;
        settle().await;

        ctl.enter_playback().unwrap();
        assert_eq!(ctl.asset().unwrap().segment_count(), 2);
        assert_eq!(&ctl.asset().unwrap().data()[..], &[1, 2]);
        assert_eq!(ctl.position(), Duration::ZERO);
        buffer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_playback_state() {
        let buffer = recorded(2).await;
        let mut ctl = controller(&buffer);
        ctl.enter_playback().unwrap();
        ctl.pause().unwrap();
        ctl.seek_relative(0.5).unwrap();

        let status = ctl.status();
        assert_eq!(status.mode, ViewMode::Playback);
        assert!(!status.playing);
        assert_eq!(status.position, Duration::from_millis(500));
        assert_eq!(status.duration, Some(Duration::from_secs(1)));
        assert_eq!(status.to_string(), "playback paused at 1.00x, 0.500s / 1.000s");
    }
}
