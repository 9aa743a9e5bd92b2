//! Oneplay vendor: HTTP calls answered over a WebSocket push channel.

pub mod client;
pub mod push;
pub mod types;

pub use client::OneplayApi;
pub use push::{PushConnector, WebSocketConnector};
