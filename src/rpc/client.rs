//! RPC endpoint on top of [`StreamClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::channel::RpcChannel;
use super::envelope::require_binary_framing;
use super::message::InvocationRequest;
use super::proxy::{CallProxy, Invoker, RemoteService};
use super::registry::{LocalService, ServiceRegistry};
use crate::config::ClientConfig;
use crate::connection::{ConnectionStatus, FrameInterceptor, FrameSink, Session, StreamClient};
use crate::error::{Result, WireError};
use crate::protocol::{ConnectionId, Frame};
use crate::transport::Connector;

/// Duplex RPC client.
///
/// Calls go out over the current connection; requests from the server are
/// served from the local services. Plain messages sent with
/// [`StreamClient::send`] keep arriving as message events.
///
/// ```ignore
/// let client = RpcClient::new(ClientConfig::default().auto_reconnect(true))?;
/// client.register_remote("Echo");
/// client.connect("127.0.0.1:9000", Duration::from_secs(2)).await?;
///
/// let echo = client.proxy("Echo")?;
/// let reply: String = echo.call("Call", ("hello",)).await?;
/// ```
#[derive(Clone)]
pub struct RpcClient {
    stream: StreamClient,
    channel: Arc<RpcChannel>,
}

/// Inbound hook: RPC frames go to the channel, everything else passes.
struct ClientHook {
    channel: Arc<RpcChannel>,
}

#[async_trait]
impl FrameInterceptor for ClientHook {
    async fn on_frame(&self, session: &Arc<Session>, frame: Frame) -> Option<Frame> {
        let sink: Arc<dyn FrameSink> = session.clone();
        self.channel.handle_frame(sink, frame)
    }

    async fn on_closed(&self, _connection_id: ConnectionId) {
        self.channel.fail_pending();
    }
}

/// Sends through whatever connection the client currently has.
struct ClientInvoker {
    stream: StreamClient,
    channel: Arc<RpcChannel>,
}

#[async_trait]
impl Invoker for ClientInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<Bytes> {
        self.channel.call(&self.stream, request).await
    }
}

impl RpcClient {
    /// Create a closed client.
    ///
    /// # Errors
    ///
    /// `Protocol` unless the framing is length-prefix.
    pub fn new(config: ClientConfig) -> Result<Self> {
        require_binary_framing(&config.framing)?;
        let timeout = config.call_timeout_duration();
        let stream = StreamClient::new(config)?;
        let channel = Arc::new(RpcChannel::new(Arc::new(ServiceRegistry::new()), timeout));
        stream.set_interceptor(Arc::new(ClientHook {
            channel: channel.clone(),
        }));
        Ok(Self { stream, channel })
    }

    /// Underlying connection, for status, events, raw messages and groups.
    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        self.channel.registry()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.stream.status()
    }

    /// Serve `service` to the remote side.
    pub fn add_local_service(&self, service: LocalService) {
        tracing::debug!("Client {} serves {}", self.stream.id(), service.name());
        self.registry().add_local(service);
    }

    pub fn remove_local_service(&self, name: &str) -> bool {
        self.registry().remove_local(name)
    }

    /// Allow calls to the remote interface `name`.
    pub fn register_remote(&self, name: &str) {
        self.registry().register_remote(name);
    }

    pub fn unregister_remote(&self, name: &str) -> bool {
        self.registry().unregister_remote(name)
    }

    /// Call stub for a registered remote interface.
    ///
    /// The stub follows the client across reconnects.
    ///
    /// # Errors
    ///
    /// `InterfaceNotRegistered` unless `name` was passed to
    /// [`register_remote`](Self::register_remote).
    pub fn proxy(&self, name: &str) -> Result<CallProxy> {
        if !self.registry().is_remote(name) {
            return Err(WireError::InterfaceNotRegistered(name.to_string()));
        }
        let invoker = Arc::new(ClientInvoker {
            stream: self.stream.clone(),
            channel: self.channel.clone(),
        });
        Ok(CallProxy::new(name, invoker))
    }

    /// Typed stub for `T::INTERFACE`.
    pub fn proxy_as<T: RemoteService>(&self) -> Result<T> {
        self.proxy(T::INTERFACE).map(T::from_proxy)
    }

    pub async fn connect(&self, target: &str, timeout: Duration) -> Result<bool> {
        self.stream.connect(target, timeout).await
    }

    pub async fn connect_with(&self, connector: Arc<dyn Connector>, timeout: Duration) -> Result<bool> {
        self.stream.connect_with(connector, timeout).await
    }

    /// Close the connection; outstanding calls fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.stream.close().await;
        self.channel.fail_pending();
    }
}
