use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use relive_client::{Receiver, WebRtcPeerFactory};
use relive_common::config::DEFAULT_STUN_SERVER;
use relive_common::{OfferPolicy, ReceiverConfig, RecordingConfig, SessionConfig};
use relive_media::{LoggingSink, ViewerCommand};

#[derive(Parser, Debug)]
#[command(name = "relive-receiver", version)]
struct Args {
    /// Signaling relay WebSocket URL
    #[arg(long, env = "RELIVE_RELAY_URL", default_value = "ws://127.0.0.1:8080/ws")]
    relay_url: String,

    /// Seconds to wait for the relay connection
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Number of segments kept in the rolling buffer
    #[arg(long, env = "RELIVE_SEGMENT_COUNT", default_value_t = 1000)]
    segment_count: usize,

    /// Duration of one recorded segment in milliseconds
    #[arg(long, env = "RELIVE_SEGMENT_MS", default_value_t = 500)]
    segment_ms: u64,

    /// STUN/TURN server URL (repeatable)
    #[arg(long = "ice-server", env = "RELIVE_ICE_SERVER", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Seconds to wait for media after answering an offer
    #[arg(long, env = "RELIVE_NEGOTIATION_TIMEOUT_SECS", default_value_t = 15)]
    negotiation_timeout: u64,

    /// What to do with a new offer while a session is up: `restart` or `reject`
    #[arg(long, env = "RELIVE_OFFER_POLICY", default_value = "restart")]
    offer_policy: OfferPolicy,

    /// Do not register again with the relay after a failed session
    #[arg(long, default_value_t = false)]
    no_reregister: bool,

    /// Read viewer commands from stdin, one per line (play, pause, speed-up, playback, live, ...)
    #[arg(long, default_value_t = false)]
    controls_stdin: bool,
}

impl Args {
    fn into_config(self) -> ReceiverConfig {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            self.ice_servers
        };
        ReceiverConfig {
            relay_url: self.relay_url,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            session: SessionConfig {
                ice_servers,
                negotiation_timeout: Duration::from_secs(self.negotiation_timeout),
                offer_policy: self.offer_policy,
                ..Default::default()
            },
            recording: RecordingConfig {
                segment_count: self.segment_count,
                segment_duration_ms: self.segment_ms,
            },
            reregister_on_failure: !self.no_reregister,
        }
    }
}

fn spawn_stdin_controls(tx: mpsc::Sender<ViewerCommand>) {
    std::thread::spawn(move || {
        eprintln!(
            "Viewer controls on stdin: {}",
            ViewerCommand::ALL.map(|c| c.as_str()).join(", ")
        );
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => match line.parse::<ViewerCommand>() {
                    Ok(command) => {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("invalid viewer command `{}`: {}", line.trim(), err),
                },
                Err(err) => {
                    eprintln!("stdin read error: {}", err);
                    break;
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

fn main() -> Result<()> {
    relive_common::init_tracing();

    let args = Args::parse();
    let controls_stdin = args.controls_stdin;
    let config = args.into_config();

    let (command_tx, command_rx) = mpsc::channel::<ViewerCommand>(64);
    if controls_stdin {
        spawn_stdin_controls(command_tx);
    } else {
        drop(command_tx);
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            info!("Starting relive-receiver v{}", env!("CARGO_PKG_VERSION"));
            let factory = Arc::new(WebRtcPeerFactory::new(config.session.ice_servers.clone()));
            let receiver = Receiver::connect(config, factory, LoggingSink).await?;
            receiver.run(command_rx, shutdown_signal()).await
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_map_to_config() {
        let args = Args::try_parse_from(["relive-receiver"]).unwrap();
        let config = args.into_config();
        assert_eq!(config.recording.segment_count, 1000);
        assert_eq!(config.recording.segment_duration_ms, 500);
        assert_eq!(config.session.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.session.offer_policy, OfferPolicy::Restart);
        assert!(config.reregister_on_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "relive-receiver",
            "--relay-url",
            "wss://relay.example.com/ws",
            "--segment-count",
            "20",
            "--ice-server",
            "stun:a.example.com:3478,stun:b.example.com:3478",
            "--offer-policy",
            "reject",
            "--no-reregister",
        ])
        .unwrap();
        let config = args.into_config();
        assert_eq!(config.relay_url, "wss://relay.example.com/ws");
        assert_eq!(config.recording.segment_count, 20);
        assert_eq!(config.session.ice_servers.len(), 2);
        assert_eq!(config.session.offer_policy, OfferPolicy::Reject);
        assert!(!config.reregister_on_failure);
    }

    #[test]
    fn test_args_reject_unknown_offer_policy() {
        assert!(Args::try_parse_from(["relive-receiver", "--offer-policy", "maybe"]).is_err());
    }
}
