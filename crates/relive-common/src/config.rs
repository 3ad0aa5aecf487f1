use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Largest rolling buffer accepted by [`RecordingConfig::validate`].
pub const MAX_SEGMENT_COUNT: usize = 1_000_000;

/// What to do with an `offer` that arrives while a session is already negotiating or active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfferPolicy {
    /// Close the current peer and negotiate the new offer in place.
    #[default]
    Restart,
    /// Ignore the offer; the current session is kept.
    Reject,
}

impl FromStr for OfferPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" | "renegotiate" => Ok(Self::Restart),
            "reject" | "ignore" => Ok(Self::Reject),
            other => Err(format!(
                "unknown offer policy `{other}` (expected `restart` or `reject`)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ice_servers: Vec<String>,
    /// Upper bound on the time between applying an offer and the first media.
    pub negotiation_timeout: Duration,
    pub offer_policy: OfferPolicy,
    /// Candidates queued before any remote description are discarded after this long.
    pub pending_candidate_ttl: Duration,
    pub max_pending_candidates: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            negotiation_timeout: Duration::from_secs(15),
            offer_policy: OfferPolicy::default(),
            pending_candidate_ttl: Duration::from_secs(30),
            max_pending_candidates: 64,
        }
    }
}

/// Rolling-buffer sizing.
///
/// The buffer holds at most `segment_count` segments of roughly
/// `segment_duration_ms` each, so the retained history is bounded by
/// `segment_count * segment_duration_ms` (1000 x 500 ms = 500 s by default)
/// no matter how long the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingConfig {
    pub segment_count: usize,
    pub segment_duration_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            segment_count: 1000,
            segment_duration_ms: 500,
        }
    }
}

impl RecordingConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_millis(self.segment_duration_ms)
    }

    /// Longest stretch of video the buffer can hold.
    pub fn retention(&self) -> Duration {
        let count = u64::try_from(self.segment_count).unwrap_or(u64::MAX);
        Duration::from_millis(self.segment_duration_ms.saturating_mul(count))
    }

    pub fn validate(&self) -> Result<()> {
        if self.segment_count == 0 {
            return Err(Error::config("segment_count must be at least 1"));
        }
        if self.segment_count > MAX_SEGMENT_COUNT {
            return Err(Error::config(format!(
                "segment_count must be at most {MAX_SEGMENT_COUNT}"
            )));
        }
        if self.segment_duration_ms == 0 {
            return Err(Error::config("segment_duration_ms must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub relay_url: String,
    pub connect_timeout: Duration,
    pub session: SessionConfig,
    pub recording: RecordingConfig,
    /// Send `register` again after a failed session so the sender can re-offer.
    pub reregister_on_failure: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout: Duration::from_secs(10),
            session: SessionConfig::default(),
            recording: RecordingConfig::default(),
            reregister_on_failure: true,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        self.recording.validate()?;
        if self.session.negotiation_timeout.is_zero() {
            return Err(Error::config("negotiation timeout must be non-zero"));
        }
        if self.relay_url.trim().is_empty() {
            return Err(Error::config("relay url is required"));
        }
        Ok(())
    }
}
