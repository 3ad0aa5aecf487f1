use std::time::Duration;

use relive_common::RecordingConfig;
use relive_media::{
    LiveStream, LoggingSink, MediaPacket, PlaybackController, RecordingBuffer, ViewMode,
    ViewerCommand,
};
use tokio::time;

fn config() -> RecordingConfig {
    RecordingConfig {
        segment_count: 6,
        segment_duration_ms: 500,
    }
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Publish one packet per capture interval for `intervals` intervals.
async fn feed(stream: &LiveStream, from: u8, intervals: u8) {
    for n in from..from + intervals {
        stream.publish(MediaPacket::new(n as u64 * 500_000, n % 4 == 0, vec![n; 16]));
        settle().await;
        time::advance(Duration::from_millis(500)).await;
        settle().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_mode_switching_does_not_disturb_recording() {
    let stream = LiveStream::new(1);

    let mut watched = RecordingBuffer::new(config());
    let mut untouched = RecordingBuffer::new(config());
    watched.start(&stream);
    untouched.start(&stream);
    settle().await;

    let mut controller = PlaybackController::new(watched.reader(), LoggingSink);
    controller.attach_live(stream.clone()).unwrap();

    feed(&stream, 0, 3).await;

    controller.apply(ViewerCommand::EnterPlayback).unwrap();
    assert_eq!(controller.mode(), ViewMode::Playback);
    controller.apply(ViewerCommand::SpeedUp).unwrap();
    controller.apply(ViewerCommand::FrameNext).unwrap();

    // Capture keeps going while the viewer is in playback.
    feed(&stream, 3, 5).await;

    controller.apply(ViewerCommand::ReturnToLive).unwrap();
    assert_eq!(controller.mode(), ViewMode::Live);

    feed(&stream, 8, 2).await;

    watched.stop_and_flush().await;
    untouched.stop_and_flush().await;

    let a = watched.snapshot();
    let b = untouched.snapshot();
    assert_eq!(a.sequences(), b.sequences());
    assert_eq!(a.sequences(), vec![5, 6, 7, 8, 9, 10]);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.data, y.data);
        assert_eq!(x.duration, y.duration);
    }
    assert_eq!(watched.stats().total_evicted, 4);
}

#[tokio::test(start_paused = true)]
async fn test_playback_asset_is_frozen_at_entry() {
    let stream = LiveStream::new(1);
    let mut buffer = RecordingBuffer::new(config());
    buffer.start(&stream);
    settle().await;

    let mut controller = PlaybackController::new(buffer.reader(), LoggingSink);
    feed(&stream, 0, 2).await;
    controller.enter_playback().unwrap();
    let asset = controller.asset().cloned().unwrap();

    feed(&stream, 2, 3).await;

    assert_eq!(asset.segment_count(), 2);
    assert_eq!(asset.duration(), Duration::from_secs(1));
    assert_eq!(asset.sequence_range(), (1, 2));
    assert_eq!(buffer.snapshot().len(), 5);
    buffer.stop();
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_during_capture_is_ordered() {
    let stream = LiveStream::new(1);
    let mut buffer = RecordingBuffer::new(config());
    let reader = buffer.reader();
    buffer.start(&stream);
    settle().await;

    for round in 0..4u8 {
        feed(&stream, round * 3, 3).await;
        let snapshot = reader.snapshot();
        let sequences = snapshot.sequences();
        assert!(sequences.len() <= 6);
        assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
        let tags: Vec<u8> = snapshot.iter().map(|s| s.data[0]).collect();
        let expected: Vec<u8> = sequences.iter().map(|seq| (*seq - 1) as u8).collect();
        assert_eq!(tags, expected);
    }
    buffer.stop();
}
