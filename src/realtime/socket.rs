//! Realtime WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::protocol::Frame;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct RealtimeSocket {
    stream: WsStream,
    next_ref: u64,
}

impl RealtimeSocket {
    /// Connect to the realtime endpoint.
    ///
    /// The project key rides in the URL; the user's token is sent later in
    /// the channel join payload.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        tracing::info!("Connecting realtime socket");
        tracing::debug!("Realtime URL: {}", ws_url);

        let (stream, response) = connect_async(ws_url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("Realtime socket connected (status={})", response.status());

        Ok(Self { stream, next_ref: 0 })
    }

    /// Allocate the next message reference.
    pub fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame).context("Failed to encode frame")?;
        tracing::debug!("WS send: {}", text);
        self.stream
            .send(WsMessage::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next channel frame, answering pings and skipping
    /// anything that is not a JSON frame.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => return Ok(Some(frame)),
                        Err(e) => tracing::warn!("Unparseable realtime frame: {}", e),
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    self.stream
                        .send(WsMessage::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}
