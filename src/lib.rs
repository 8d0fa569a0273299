//! # duplexwire
//!
//! Duplex RPC over framed byte streams.
//!
//! Two processes expose and consume service interfaces over TCP, named pipes
//! (Unix domain sockets on Unix), UDP or an in-process duplex. Either side can
//! call the other on the same connection.
//!
//! ## Layers
//!
//! - **Framing** ([`protocol`]): length-prefix or end-mark packet splitting
//!   with zero-copy frame slicing
//! - **Connections** ([`connection`]): client with auto-reconnect, server with
//!   per-client sessions, serialized status/message events
//! - **Groups** ([`group`]): server-side multicast membership driven by
//!   control frames
//! - **RPC** ([`rpc`]): correlation-id multiplexing, service registry and
//!   call proxies
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use duplexwire::{ClientConfig, RpcClient, RpcServer, ServerConfig, ServiceBuilder};
//!
//! struct Echo;
//!
//! #[tokio::main]
//! async fn main() -> duplexwire::Result<()> {
//!     let server = RpcServer::new(ServerConfig::default())?;
//!     server.add_local_service(
//!         ServiceBuilder::instance("Echo", Arc::new(Echo))
//!             .method("Call", |_svc, (text,): (String,)| async move { Ok::<_, String>(text) })
//!             .build(),
//!     );
//!     server.start("127.0.0.1:9000").await?;
//!
//!     let client = RpcClient::new(ClientConfig::default())?;
//!     client.register_remote("Echo");
//!     client.connect("127.0.0.1:9000", Duration::from_secs(2)).await?;
//!
//!     let reply: String = client.proxy("Echo")?.call("Call", ("hi",)).await?;
//!     assert_eq!(reply, "hi");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod protocol;
pub mod rpc;
pub mod transport;

pub use config::{ClientConfig, FramingConfig, ServerConfig};
pub use connection::{ConnectionEvent, ConnectionStatus, StreamClient, StreamServer};
pub use error::{Result, WireError};
pub use protocol::{ConnectionId, Frame};
pub use rpc::{CallProxy, RemoteService, RpcClient, RpcServer, ServiceBuilder, UdpRpcClient, UdpRpcServer};
pub use transport::Target;
