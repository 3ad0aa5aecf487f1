use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use relive_common::{
    Error, IceCandidate, PeerRole, Registration, Result, SessionDescription, SignalMessage,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn validate_relay_url(url: &str) -> Result<()> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(())
    } else {
        Err(Error::relay_unavailable(format!(
            "unsupported relay url `{url}` (expected ws:// or wss://)"
        )))
    }
}

/// Cloneable outbound half of the relay channel.
///
/// Messages are delivered in the order they were sent while the channel is
/// open. There is no acknowledgment.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl SignalSender {
    /// A sender whose messages land in the returned receiver instead of a socket.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: SignalMessage) -> Result<()> {
        debug!("signal out: {}", message.kind());
        self.tx
            .send(message)
            .map_err(|_| Error::transport("relay channel closed"))
    }
}

/// Connection to the signaling relay.
pub struct SignalingClient {
    url: String,
    sender: SignalSender,
    inbound: Option<SplitStream<WsStream>>,
    close_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Open the relay channel and register as the receiving peer.
    ///
    /// One attempt only; any failure is `RelayUnavailable`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        validate_relay_url(url)?;

        let ws_stream = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => return Err(Error::relay_unavailable(format!("{url}: {e}"))),
            Err(_) => {
                return Err(Error::relay_unavailable(format!(
                    "{url}: no connection after {timeout:?}"
                )))
            }
        };
        info!("Connected to signaling relay: {}", url);

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(write, rx, close_rx));

        let client = Self {
            url: url.to_string(),
            sender: SignalSender { tx },
            inbound: Some(read),
            close_tx: Some(close_tx),
            writer: Some(writer),
        };
        client.send(SignalMessage::register(PeerRole::Receiver))?;
        Ok(client)
    }

    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    pub fn send(&self, message: SignalMessage) -> Result<()> {
        self.sender.send(message)
    }

    /// Next message from the relay, or `None` once the channel is closed.
    ///
    /// Frames that do not parse are logged and skipped. Cancel safe.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        loop {
            let read = self.inbound.as_mut()?;
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        debug!("signal in: {}", message.kind());
                        return Some(message);
                    }
                    Err(e) => {
                        warn!("Failed to parse signaling message: {}", e);
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Signaling relay closed the channel: {:?}", frame);
                    self.inbound = None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Signaling WebSocket error: {}", e);
                    self.inbound = None;
                }
                None => {
                    self.inbound = None;
                }
            }
        }
    }

    /// Feed every inbound message to `handler` until the channel closes.
    pub async fn on_message<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: SignalHandler + ?Sized,
    {
        while let Some(message) = self.recv().await {
            dispatch(handler, message).await?;
        }
        Ok(())
    }

    /// Close the relay channel. Queued outbound messages are flushed first.
    pub async fn disconnect(&mut self) {
        self.inbound = None;
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            match tokio::time::timeout(WRITER_SHUTDOWN_GRACE, writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("signaling writer ended abnormally: {}", e),
                Err(_) => warn!("signaling writer did not finish in {:?}", WRITER_SHUTDOWN_GRACE),
            }
            info!("Disconnected from signaling relay: {}", self.url);
        }
    }
}

async fn write_loop(
    mut write: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<SignalMessage>,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    if !send_frame(&mut write, &message).await {
                        return;
                    }
                }
                None => break,
            },
            _ = &mut close_rx => {
                while let Ok(message) = rx.try_recv() {
                    if !send_frame(&mut write, &message).await {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = write.send(WsMessage::Close(None)).await;
}

async fn send_frame(write: &mut SplitSink<WsStream, WsMessage>, message: &SignalMessage) -> bool {
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {} message: {}", message.kind(), e);
            return true;
        }
    };
    if let Err(e) = write.send(WsMessage::Text(text)).await {
        error!("Failed to send signaling message: {}", e);
        return false;
    }
    true
}

/// Per-tag handling of inbound relay messages.
///
/// The receiver never offers, so `register` and `answer` are only logged
/// unless an implementation says otherwise.
#[async_trait]
pub trait SignalHandler: Send {
    async fn on_register(&mut self, registration: Registration) -> Result<()> {
        debug!("ignoring register from relay: {:?}", registration.role);
        Ok(())
    }

    async fn on_offer(&mut self, description: SessionDescription) -> Result<()>;

    async fn on_answer(&mut self, _description: SessionDescription) -> Result<()> {
        debug!("ignoring answer: this endpoint never offers");
        Ok(())
    }

    async fn on_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;
}

/// Route one message to the matching handler method.
pub async fn dispatch<H>(handler: &mut H, message: SignalMessage) -> Result<()>
where
    H: SignalHandler + ?Sized,
{
    match message {
        SignalMessage::Register(registration) => handler.on_register(registration).await,
        SignalMessage::Offer(description) => handler.on_offer(description).await,
        SignalMessage::Answer(description) => handler.on_answer(description).await,
        SignalMessage::IceCandidate(candidate) => handler.on_ice_candidate(candidate).await,
    }
}
