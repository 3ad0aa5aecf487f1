//! Peer session lifecycle.
//!
//! - IDLE: no session yet
//! - NEGOTIATING: offer applied and answered, waiting for media
//! - ACTIVE: media is flowing and the live stream has been published
//! - FAILED: negotiation or transport failed; a new offer starts over
//! - CLOSED: torn down locally, everything is ignored from here on

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relive_common::{
    Error, IceCandidate, OfferPolicy, Result, SdpKind, SessionConfig, SessionDescription,
    SignalMessage,
};
use relive_media::LiveStream;

use crate::peer::{PeerEvent, PeerEventKind, PeerEventSink, PeerFactory, PeerState, PeerTransport};
use crate::signaling::{SignalHandler, SignalSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Active,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome the rest of the receiver has to react to.
#[derive(Debug)]
pub enum SessionNotice {
    /// Media started flowing. Published once per session.
    StreamPublished(LiveStream),
    /// The published stream of `generation` is gone.
    StreamEnded { generation: u64 },
    /// The session failed and was torn down.
    Failed(Error),
}

struct PendingCandidate {
    candidate: IceCandidate,
    received_at: Instant,
}

struct Session {
    generation: u64,
    transport: Box<dyn PeerTransport>,
    remote_applied: bool,
    deadline: Instant,
    stream: Option<LiveStream>,
}

/// Owns the one peer session and drives it from signaling and transport events.
pub struct SessionManager {
    config: SessionConfig,
    factory: Arc<dyn PeerFactory>,
    signals: SignalSender,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    state: SessionState,
    generation: u64,
    session: Option<Session>,
    pending: VecDeque<PendingCandidate>,
    notices: VecDeque<SessionNotice>,
}

impl SessionManager {
    /// Returns the manager and the queue its transports post events to.
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn PeerFactory>,
        signals: SignalSender,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            factory,
            signals,
            events_tx,
            state: SessionState::Idle,
            generation: 0,
            session: None,
            pending: VecDeque::new(),
            notices: VecDeque::new(),
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the most recently created session (0 before the first offer).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn live_stream(&self) -> Option<&LiveStream> {
        self.session.as_ref().and_then(|s| s.stream.as_ref())
    }

    pub fn next_notice(&mut self) -> Option<SessionNotice> {
        self.notices.pop_front()
    }

    /// Handle one event from a transport. Events from replaced sessions are dropped.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let current = self.session.as_ref().map(|s| s.generation);
        if self.state == SessionState::Closed || current != Some(event.generation) {
            debug!(
                "discarding event from stale session {} (current {:?})",
                event.generation, current
            );
            return;
        }

        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                if let Err(e) = self.signals.send(SignalMessage::IceCandidate(candidate)) {
                    warn!("could not send local candidate: {}", e);
                }
            }
            PeerEventKind::StreamStarted(stream) => self.publish_stream(stream),
            PeerEventKind::StateChanged(state) => self.on_peer_state(state).await,
        }
    }

    /// Enforce the negotiation deadline and expire stale early candidates.
    pub async fn poll_timeouts(&mut self, now: Instant) {
        self.expire_pending(now);

        let timed_out = self.state == SessionState::Negotiating
            && self.session.as_ref().is_some_and(|s| now >= s.deadline);
        if timed_out {
            let timeout = self.config.negotiation_timeout;
            self.fail(Error::negotiation(format!("no media within {timeout:?}")))
                .await;
        }
    }

    /// Close the session for good. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.close_session().await;
        self.pending.clear();
        self.state = SessionState::Closed;
        info!("session closed");
    }

    fn publish_stream(&mut self, stream: LiveStream) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.stream.is_some() {
            debug!("stream for session {} already published", session.generation);
            return;
        }
        session.stream = Some(stream.clone());
        self.state = SessionState::Active;
        info!("session {} active, media flowing", session.generation);
        self.notices.push_back(SessionNotice::StreamPublished(stream));
    }

    async fn on_peer_state(&mut self, state: PeerState) {
        match state {
            PeerState::Connected => info!("peer connected"),
            PeerState::Disconnected => warn!("peer disconnected, waiting for it to recover"),
            PeerState::Failed => self.fail(Error::transport("peer connection failed")).await,
            PeerState::Closed => {
                if matches!(
                    self.state,
                    SessionState::Negotiating | SessionState::Active
                ) {
                    self.fail(Error::transport("peer connection closed by remote"))
                        .await;
                }
            }
            PeerState::New | PeerState::Connecting => debug!("peer {}", state),
        }
    }

    async fn negotiate(&mut self, description: SessionDescription) -> Result<()> {
        if description.kind != SdpKind::Offer {
            return Err(Error::negotiation(format!(
                "expected an offer description, got {:?}",
                description.kind
            )));
        }

        self.generation += 1;
        let generation = self.generation;
        let events = PeerEventSink::new(generation, self.events_tx.clone());
        let transport = self
            .factory
            .create(events)
            .await
            .map_err(|e| Error::negotiation(format!("creating peer: {e:#}")))?;
        let session = self.session.insert(Session {
            generation,
            transport,
            remote_applied: false,
            deadline: Instant::now() + self.config.negotiation_timeout,
            stream: None,
        });

        session
            .transport
            .apply_remote_description(description)
            .await
            .map_err(|e| Error::negotiation(format!("applying offer: {e:#}")))?;
        session.remote_applied = true;

        let now = Instant::now();
        let ttl = self.config.pending_candidate_ttl;
        let mut flushed = 0;
        while let Some(pending) = self.pending.pop_front() {
            if now.saturating_duration_since(pending.received_at) >= ttl {
                debug!("dropping expired early candidate");
                continue;
            }
            if let Err(e) = session.transport.add_remote_candidate(pending.candidate).await {
                warn!("early candidate rejected: {:#}", e);
            }
            flushed += 1;
        }
        if flushed > 0 {
            debug!("applied {} early candidates", flushed);
        }

        let answer = session
            .transport
            .create_answer()
            .await
            .map_err(|e| Error::negotiation(format!("creating answer: {e:#}")))?;
        self.signals.send(SignalMessage::Answer(answer))?;

        self.state = SessionState::Negotiating;
        info!("session {} negotiating, answer sent", generation);
        Ok(())
    }

    async fn fail(&mut self, error: Error) {
        warn!("session failed: {}", error);
        self.close_session().await;
        self.pending.clear();
        self.state = SessionState::Failed;
        self.notices.push_back(SessionNotice::Failed(error));
    }

    async fn close_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Err(e) = session.transport.close().await {
            debug!("closing session {}: {:#}", session.generation, e);
        }
        if session.stream.is_some() {
            self.notices.push_back(SessionNotice::StreamEnded {
                generation: session.generation,
            });
        }
    }

    fn expire_pending(&mut self, now: Instant) {
        let ttl = self.config.pending_candidate_ttl;
        let before = self.pending.len();
        self.pending
            .retain(|p| now.saturating_duration_since(p.received_at) < ttl);
        let expired = before - self.pending.len();
        if expired > 0 {
            debug!("discarded {} early candidates older than {:?}", expired, ttl);
        }
    }

    fn queue_candidate(&mut self, candidate: IceCandidate) {
        if self.pending.len() >= self.config.max_pending_candidates.max(1) {
            self.pending.pop_front();
            warn!(
                "early candidate queue full ({}), dropped the oldest",
                self.config.max_pending_candidates
            );
        }
        self.pending.push_back(PendingCandidate {
            candidate,
            received_at: Instant::now(),
        });
    }
}

#[async_trait]
impl SignalHandler for SessionManager {
    async fn on_offer(&mut self, description: SessionDescription) -> Result<()> {
        match self.state {
            SessionState::Closed => {
                debug!("session closed, ignoring offer");
                return Ok(());
            }
            SessionState::Negotiating | SessionState::Active => match self.config.offer_policy {
                OfferPolicy::Reject => {
                    info!("offer received while {}, rejecting", self.state);
                    return Ok(());
                }
                OfferPolicy::Restart => {
                    info!("offer received while {}, restarting session", self.state);
                    self.close_session().await;
                }
            },
            SessionState::Idle | SessionState::Failed => {}
        }

        info!("received offer");
        if let Err(e) = self.negotiate(description).await {
            self.fail(e).await;
        }
        Ok(())
    }

    async fn on_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if candidate.is_end_of_candidates() {
            debug!("remote end-of-candidates");
            return Ok(());
        }
        let Some(session) = self.session.as_ref().filter(|s| s.remote_applied) else {
            debug!("no remote description yet, queueing candidate");
            self.queue_candidate(candidate);
            return Ok(());
        };
        if let Err(e) = session.transport.add_remote_candidate(candidate).await {
            warn!("remote candidate rejected: {:#}", e);
        }
        Ok(())
    }
}
