use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use relive_common::{Error, PeerRole, ReceiverConfig, SignalMessage};
use relive_media::{PlaybackController, RecordingBuffer, ViewSink, ViewerCommand};

use crate::peer::{PeerEvent, PeerFactory};
use crate::session::{SessionManager, SessionNotice, SessionState};
use crate::signaling::{dispatch, SignalingClient};

/// How often negotiation deadlines and early-candidate expiry are checked.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// The assembled receiver: signaling, session, recording and playback on one event loop.
pub struct Receiver<S: ViewSink> {
    config: ReceiverConfig,
    signaling: SignalingClient,
    session: SessionManager,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    recording: RecordingBuffer,
    controller: PlaybackController<S>,
}

impl<S: ViewSink> Receiver<S> {
    pub fn new(
        config: ReceiverConfig,
        signaling: SignalingClient,
        factory: Arc<dyn PeerFactory>,
        sink: S,
    ) -> Self {
        let (session, peer_events) =
            SessionManager::new(config.session.clone(), factory, signaling.sender());
        let recording = RecordingBuffer::new(config.recording.clone());
        let controller = PlaybackController::new(recording.reader(), sink);
        Self {
            config,
            signaling,
            session,
            peer_events,
            recording,
            controller,
        }
    }

    /// Connect to the configured relay and assemble a receiver around it.
    pub async fn connect(
        config: ReceiverConfig,
        factory: Arc<dyn PeerFactory>,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let signaling = SignalingClient::connect(&config.relay_url, config.connect_timeout).await?;
        Ok(Self::new(config, signaling, factory, sink))
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn controller(&self) -> &PlaybackController<S> {
        &self.controller
    }

    /// Process events until `shutdown` resolves or the relay goes away.
    ///
    /// Viewer commands are optional; the loop keeps running after the
    /// command channel closes.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ViewerCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        let mut housekeeping = time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(
            "receiver ready, keeping {:?} of recording",
            self.config.recording.retention()
        );
        if let Err(e) = self.controller.detach_live() {
            warn!("view sink error: {:#}", e);
        }

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                message = self.signaling.recv() => match message {
                    Some(message) => {
                        if let Err(e) = dispatch(&mut self.session, message).await {
                            warn!("signaling message not handled: {}", e);
                        }
                    }
                    None => {
                        break Err(Error::relay_unavailable("relay channel closed").into());
                    }
                },
                Some(event) = self.peer_events.recv() => {
                    self.session.handle_peer_event(event).await;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.apply_command(command),
                    None => {
                        debug!("viewer command channel closed");
                        commands_open = false;
                    }
                },
                _ = housekeeping.tick() => {
                    self.session.poll_timeouts(Instant::now()).await;
                }
            }
            self.handle_notices().await;
        };

        self.shutdown().await;
        outcome
    }

    fn apply_command(&mut self, command: ViewerCommand) {
        if let Err(e) = self.controller.apply(command) {
            warn!("view sink error on {}: {:#}", command, e);
        }
        info!("{}", self.controller.status());
    }

    async fn handle_notices(&mut self) {
        while let Some(notice) = self.session.next_notice() {
            match notice {
                SessionNotice::StreamPublished(stream) => {
                    self.recording.start(&stream);
                    if let Err(e) = self.controller.attach_live(stream) {
                        warn!("view sink error: {:#}", e);
                    }
                }
                SessionNotice::StreamEnded { generation } => {
                    debug!("stream of session {} ended", generation);
                    self.recording.stop_and_flush().await;
                    if let Err(e) = self.controller.detach_live() {
                        warn!("view sink error: {:#}", e);
                    }
                }
                SessionNotice::Failed(e) => {
                    error!("session failed: {}", e);
                    if self.config.reregister_on_failure {
                        if let Err(e) = self.signaling.send(SignalMessage::register(PeerRole::Receiver))
                        {
                            warn!("could not re-register with relay: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.session.teardown().await;
        self.handle_notices().await;
        self.recording.stop_and_flush().await;

        let stats = self.recording.stats();
        info!(
            "recorded {} segments ({} evicted), holding {} ({:?}, {} bytes)",
            stats.total_captured,
            stats.total_evicted,
            stats.held_segments,
            stats.buffered_duration,
            stats.held_bytes
        );
        self.signaling.disconnect().await;
    }
}
