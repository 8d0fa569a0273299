//! Connection module - client and server lifecycle over framed streams.
//!
//! Provides:
//! - [`StreamClient`] - outbound connection with optional auto-reconnect
//! - [`StreamServer`] - accept loop, per-client sessions, groups, broadcast
//! - [`EventHub`] - serialized status/message notifications
//!
//! # Example
//!
//! ```ignore
//! use duplexwire::connection::StreamClient;
//! use duplexwire::config::ClientConfig;
//!
//! let client = StreamClient::new(ClientConfig::default())?;
//! client.events().on_message(|frame| println!("{} bytes", frame.len()));
//! client.connect("127.0.0.1:9000", Duration::from_secs(2)).await?;
//! client.send(b"hello").await?;
//! ```

mod client;
mod events;
mod server;
mod session;
mod status;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ConnectionId, Frame};

pub use client::StreamClient;
pub use events::{ConnectionEvent, EventHub};
pub use server::{StreamServer, MAX_CONSECUTIVE_ACCEPT_ERRORS};
pub use session::Session;
pub use status::ConnectionStatus;

/// Anything a framed payload can be sent through.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one payload as a single frame.
    async fn send_frame(&self, payload: &[u8]) -> Result<()>;

    /// Connection the sink writes to.
    fn sink_id(&self) -> ConnectionId;
}

/// Hook into a connection's inbound path, installed by higher layers.
///
/// The interceptor sees every non-control frame before it becomes a
/// message event and may consume it.
#[async_trait]
pub trait FrameInterceptor: Send + Sync + 'static {
    /// A session became live. Runs before its first frame is read.
    async fn on_connected(&self, _session: &Arc<Session>) {}

    /// Inspect a frame; return it to let it through as a message event.
    async fn on_frame(&self, session: &Arc<Session>, frame: Frame) -> Option<Frame>;

    /// A session was torn down.
    async fn on_closed(&self, _connection_id: ConnectionId) {}
}
