//! Duplex RPC: multiplexed calls in both directions over one connection.
//!
//! Layers, bottom-up:
//! - [`RpcHeader`] - request/response tag and correlation id
//! - [`PendingCalls`] - correlation id → waiting caller
//! - [`RpcChannel`] - sends calls, completes responses, serves requests
//! - [`ServiceRegistry`] - local dispatch tables and remote capability set
//! - [`CallProxy`] - typed call stub
//! - [`RpcClient`], [`RpcServer`], [`UdpRpcClient`], [`UdpRpcServer`] - endpoints

mod args;
mod channel;
mod client;
mod envelope;
mod message;
mod pending;
mod proxy;
mod registry;
mod server;
mod udp;

pub use args::{FromArgs, IntoArgs};
pub use channel::RpcChannel;
pub use client::RpcClient;
pub use envelope::{
    encode_frame, RpcHeader, RpcKind, RPC_DATAGRAM_HEADER_SIZE, RPC_HEADER_SIZE, RPC_REQUEST_MARK,
    RPC_RESPONSE_MARK,
};
pub use message::{Fault, FaultKind, InvocationRequest, InvocationResponse};
pub use pending::{PendingCall, PendingCalls};
pub use proxy::{CallProxy, Invoker, RemoteService};
pub use registry::{LocalService, ServiceBuilder, ServiceRegistry};
pub use server::RpcServer;
pub use udp::{UdpRpcClient, UdpRpcServer, MAX_DATAGRAM_SIZE};
