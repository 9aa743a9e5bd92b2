//! Oneplay push channel.
//!
//! The CMS acknowledges every HTTP call with `OkAsync` and delivers the real
//! answer over a WebSocket opened per call. The first message on the socket
//! carries the `serverId`/`sessionId` pair the HTTP request must quote.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::services::error::{IptvError, Result};

pub const PUSH_URL: &str = "wss://ws.cms.jyxo.cz/websocket";

/// Wait for each push message
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait PushChannel: Send {
    /// Next JSON message on the channel
    async fn next_json(&mut self) -> Result<Value>;

    async fn close(&mut self);
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn PushChannel>>;
}

/// Run `operation` under [`PUSH_TIMEOUT`]
pub async fn within_push_timeout<T>(what: &str, operation: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(PUSH_TIMEOUT, operation)
        .await
        .map_err(|_| IptvError::Timeout(format!("Oneplay push channel: {}", what)))?
}

/// `(serverId, sessionId)` from the greeting message
pub async fn handshake(channel: &mut dyn PushChannel) -> Result<(String, String)> {
    let greeting = channel.next_json().await?;
    let data = &greeting["data"];

    match (data["serverId"].as_str(), data["sessionId"].as_str()) {
        (Some(server_id), Some(session_id)) => Ok((server_id.to_string(), session_id.to_string())),
        _ => Err(IptvError::vendor(None, format!("invalid push greeting: {}", greeting))),
    }
}

/// Skip messages for other requests until the reply to `request_id` arrives
pub async fn await_reply(channel: &mut dyn PushChannel, request_id: &str) -> Result<Value> {
    loop {
        let mut message = channel.next_json().await?;
        let Some(response) = message.get_mut("response") else {
            continue;
        };
        if response.pointer("/context/requestId").and_then(Value::as_str) != Some(request_id) {
            continue;
        }

        if response.pointer("/result/status").and_then(Value::as_str) != Some("Ok") {
            warn!(request_id = request_id, msg = "Oneplay reply status not OK");
            return Err(IptvError::vendor(None, response.to_string()));
        }

        let data = response.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        if let Some(err) = data.get("err") {
            return Err(IptvError::vendor(None, err.to_string()));
        }
        return Ok(data);
    }
}

// ============================================================================
// WebSocket implementation
// ============================================================================

pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            base_url: PUSH_URL.to_string(),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn PushChannel>> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let url = format!("{}/{}", self.base_url, client_id);
        debug!("Connecting to push channel {}", url);

        let (stream, _) = within_push_timeout("connect", async {
            connect_async(url.as_str())
                .await
                .map_err(|e| IptvError::Network(format!("push channel connect failed: {}", e)))
        })
        .await?;

        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WebSocketChannel {
    async fn next_json(&mut self) -> Result<Value> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!("<= Oneplay push: {}", text);
                    return serde_json::from_str(&text)
                        .map_err(|e| IptvError::vendor(None, format!("{}: {}", e, text)));
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.stream.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(IptvError::Network("push channel closed".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(IptvError::Network(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Push channel close: {}", e);
        }
    }
}

// ============================================================================
// Scripted push channel for tests
// ============================================================================
