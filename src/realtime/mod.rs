//! Realtime (Phoenix channels) client for row-insert notifications
//!
//! Each subscription owns one socket connection in a background task.
//! The task reconnects and re-joins on its own until the subscription
//! is released.

pub mod protocol;
pub mod socket;

pub use protocol::ChangeFilter;

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::auth::TokenStore;
use crate::config::{Config, Endpoint};
use crate::inbox::{RealtimeChannel, Subscription};
use crate::models::Message;
use protocol::Incoming;
use socket::RealtimeSocket;

const TOPIC: &str = "realtime:live-chat";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 64;
/// Connections that lasted at least this long reset the backoff.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);

/// Reconnect delays: 1s doubling up to 64s, back to 1s once a
/// connection has been stable.
struct Backoff {
    next_secs: u64,
}

impl Backoff {
    fn new() -> Self {
        Self { next_secs: 1 }
    }

    /// Delay before the next attempt. `stable` says whether the connection
    /// that just ended lasted past `STABILITY_THRESHOLD`.
    fn next_delay(&mut self, stable: bool) -> Duration {
        if stable {
            self.next_secs = 1;
        }
        let wait = self.next_secs;
        self.next_secs = (self.next_secs * 2).min(MAX_BACKOFF_SECS);
        Duration::from_secs(wait)
    }
}

/// Reason one connection attempt ended.
enum DisconnectReason {
    /// Subscription released. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Endpoint,
    access_token: String,
    /// Re-read the saved session before each reconnect.
    reload_token: bool,
}

impl RealtimeClient {
    pub fn new(endpoint: Endpoint, access_token: String) -> Self {
        Self {
            endpoint,
            access_token,
            reload_token: true,
        }
    }

    /// Pick up a token refreshed by another command since we started.
    fn current_token(&self) -> String {
        if !self.reload_token {
            return self.access_token.clone();
        }
        Config::load()
            .ok()
            .and_then(|c| c.get_access_token())
            .filter(|t| !t.is_expired())
            .map(|t| t.token)
            .unwrap_or_else(|| self.access_token.clone())
    }

    /// Run connections with automatic reconnection until `stop` fires or
    /// the subscriber goes away.
    ///
    /// Reconnects with exponential backoff (1s, 2s, 4s, ... capped at 64s).
    async fn run(
        self,
        filter: ChangeFilter,
        tx: mpsc::UnboundedSender<Message>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut backoff = Backoff::new();

        loop {
            let (stable, error) = match self.connect_and_run(&filter, &tx, &mut stop).await {
                Ok(DisconnectReason::Shutdown) => return,
                Ok(DisconnectReason::Error(e)) => (true, e),
                Err(e) => (false, e),
            };
            let wait = backoff.next_delay(stable);
            tracing::warn!(
                "Realtime disconnected: {:#}. Reconnecting in {}s...",
                error,
                wait.as_secs()
            );

            if tx.is_closed() {
                return;
            }
            tokio::select! {
                _ = time::sleep(wait) => {}
                _ = &mut stop => return,
            }
        }
    }

    /// One connection: connect, join, deliver inserts until it drops.
    ///
    /// Returns `Ok` for shutdown or for an error after a stable session,
    /// `Err` when the attempt failed early and backoff should grow.
    async fn connect_and_run(
        &self,
        filter: &ChangeFilter,
        tx: &mpsc::UnboundedSender<Message>,
        stop: &mut oneshot::Receiver<()>,
    ) -> Result<DisconnectReason> {
        let token = self.current_token();
        let mut ws = RealtimeSocket::connect(&self.endpoint.realtime_url()).await?;

        let join_ref = ws.make_ref();
        ws.send_frame(&protocol::join_frame(TOPIC, filter, &token, &join_ref))
            .await
            .context("Channel join failed")?;

        let connected_at = Instant::now();
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // skip first immediate tick

        let disconnect_reason = loop {
            tokio::select! {
                frame = ws.recv_frame() => {
                    let frame = match frame {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                        }
                        Err(e) => {
                            break DisconnectReason::Error(e.context("WebSocket recv error"));
                        }
                    };
                    if let Some(reason) = on_incoming(protocol::classify(&frame, TOPIC, &join_ref), tx) {
                        break reason;
                    }
                }
                _ = heartbeat.tick() => {
                    let r = ws.make_ref();
                    if let Err(e) = ws.send_frame(&protocol::heartbeat_frame(&r)).await {
                        break DisconnectReason::Error(e.context("Heartbeat send failed"));
                    }
                }
                _ = &mut *stop => {
                    break DisconnectReason::Shutdown;
                }
            }
        };

        if let DisconnectReason::Shutdown = disconnect_reason {
            let r = ws.make_ref();
            if let Err(e) = ws.send_frame(&protocol::leave_frame(TOPIC, &r)).await {
                tracing::debug!("Leave failed: {:#}", e);
            }
            ws.close().await;
            tracing::info!("Left {}", TOPIC);
            return Ok(DisconnectReason::Shutdown);
        }

        if connected_at.elapsed() >= STABILITY_THRESHOLD {
            return Ok(disconnect_reason);
        }
        match disconnect_reason {
            DisconnectReason::Error(e) => Err(e),
            DisconnectReason::Shutdown => Ok(DisconnectReason::Shutdown),
        }
    }
}

/// Act on one classified frame. `Some` ends the connection.
fn on_incoming(incoming: Incoming, tx: &mpsc::UnboundedSender<Message>) -> Option<DisconnectReason> {
    match incoming {
        Incoming::Insert(Ok(msg)) => {
            if tx.send(msg).is_err() {
                return Some(DisconnectReason::Shutdown);
            }
        }
        Incoming::Insert(Err(e)) => {
            tracing::warn!("Dropping malformed live record: {}", e);
        }
        Incoming::Joined => tracing::info!("Joined {}", TOPIC),
        Incoming::JoinRejected(reason) => {
            return Some(DisconnectReason::Error(anyhow::anyhow!("Join rejected: {}", reason)));
        }
        Incoming::ChannelLost(reason) => {
            return Some(DisconnectReason::Error(anyhow::anyhow!("Channel lost: {}", reason)));
        }
        Incoming::Ignored => {}
    }
    None
}

impl RealtimeChannel for RealtimeClient {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        if self.access_token.is_empty() {
            bail!("Realtime needs a session. Run 'souq login'.");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let client = self.clone();
        let task = tokio::spawn(client.run(filter, tx, stop_rx));
        Ok(Subscription::new(rx, stop_tx, task))
    }
}
