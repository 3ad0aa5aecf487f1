use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::playback::PlaybackAsset;
use crate::stream::LiveStream;

/// Where the viewer's picture comes from. Implemented by the rendering layer.
pub trait ViewSink: Send {
    /// Switch to rendering the live stream.
    fn show_live(&mut self, stream: &LiveStream) -> Result<()>;

    /// Switch to rendering a materialized recording, starting at `position`.
    fn show_asset(&mut self, asset: &Arc<PlaybackAsset>, position: Duration) -> Result<()>;

    /// Nothing to show: no live view is available and no asset is loaded.
    fn show_nothing(&mut self) -> Result<()>;

    fn set_playing(&mut self, playing: bool) -> Result<()>;

    fn set_rate(&mut self, rate: f64) -> Result<()>;

    fn seek(&mut self, position: Duration) -> Result<()>;
}

/// Sink that only reports what it would render.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl ViewSink for LoggingSink {
    fn show_live(&mut self, stream: &LiveStream) -> Result<()> {
        info!("view: live stream {}", stream.id());
        Ok(())
    }

    fn show_asset(&mut self, asset: &Arc<PlaybackAsset>, position: Duration) -> Result<()> {
        info!(
            "view: recording of {} segments ({:?}, {} bytes) at {:?}",
            asset.segment_count(),
            asset.duration(),
            asset.len(),
            position
        );
        Ok(())
    }

    fn show_nothing(&mut self) -> Result<()> {
        info!("view: no live view available");
        Ok(())
    }

    fn set_playing(&mut self, playing: bool) -> Result<()> {
        info!("view: {}", if playing { "playing" } else { "paused" });
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        info!("view: rate {:.2}x", rate);
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        info!("view: seek to {:?}", position);
        Ok(())
    }
}
