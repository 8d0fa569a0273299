//! RPC endpoint on top of [`StreamServer`].
//!
//! Each connected client gets its own [`RpcChannel`], so calls from the
//! server to different clients are correlated independently while all
//! clients share one set of local services.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::channel::RpcChannel;
use super::envelope::require_binary_framing;
use super::message::InvocationRequest;
use super::proxy::{CallProxy, Invoker};
use super::registry::{LocalService, ServiceRegistry};
use crate::config::ServerConfig;
use crate::connection::{FrameInterceptor, FrameSink, Session, StreamServer};
use crate::error::{Result, WireError};
use crate::protocol::{ConnectionId, Frame};
use crate::transport::Acceptor;

/// Duplex RPC server.
#[derive(Clone)]
pub struct RpcServer {
    stream: StreamServer,
    hub: Arc<ChannelTable>,
}

/// Per-client channels, created on connect and failed on disconnect.
struct ChannelTable {
    registry: Arc<ServiceRegistry>,
    timeout: Option<Duration>,
    channels: Mutex<HashMap<ConnectionId, Arc<RpcChannel>>>,
}

impl ChannelTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<RpcChannel>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, id: ConnectionId) -> Option<Arc<RpcChannel>> {
        self.lock().get(&id).cloned()
    }
}

#[async_trait]
impl FrameInterceptor for ChannelTable {
    async fn on_connected(&self, session: &Arc<Session>) {
        let channel = Arc::new(RpcChannel::new(self.registry.clone(), self.timeout));
        self.lock().insert(session.id(), channel);
    }

    async fn on_frame(&self, session: &Arc<Session>, frame: Frame) -> Option<Frame> {
        match self.get(session.id()) {
            Some(channel) => {
                let sink: Arc<dyn FrameSink> = session.clone();
                channel.handle_frame(sink, frame)
            }
            None => Some(frame),
        }
    }

    async fn on_closed(&self, connection_id: ConnectionId) {
        let channel = self.lock().remove(&connection_id);
        if let Some(channel) = channel {
            channel.fail_pending();
        }
    }
}

/// Calls one specific client.
struct SessionInvoker {
    session: Arc<Session>,
    channel: Arc<RpcChannel>,
}

#[async_trait]
impl Invoker for SessionInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<Bytes> {
        if self.session.is_closed() {
            return Err(WireError::ClientDisconnected(self.session.id()));
        }
        self.channel.call(self.session.as_ref(), request).await
    }
}

impl RpcServer {
    /// Create a stopped server.
    ///
    /// # Errors
    ///
    /// `Protocol` unless the framing is length-prefix.
    pub fn new(config: ServerConfig) -> Result<Self> {
        require_binary_framing(&config.framing)?;
        let timeout = config.call_timeout_duration();
        let stream = StreamServer::new(config)?;
        let hub = Arc::new(ChannelTable {
            registry: Arc::new(ServiceRegistry::new()),
            timeout,
            channels: Mutex::new(HashMap::new()),
        });
        stream.set_interceptor(hub.clone());
        Ok(Self { stream, hub })
    }

    /// Underlying server, for events, raw messages, broadcast and groups.
    pub fn stream(&self) -> &StreamServer {
        &self.stream
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.hub.registry
    }

    /// Serve `service` to every client.
    pub fn add_local_service(&self, service: LocalService) {
        tracing::debug!("Server serves {}", service.name());
        self.hub.registry.add_local(service);
    }

    pub fn remove_local_service(&self, name: &str) -> bool {
        self.hub.registry.remove_local(name)
    }

    /// Allow calls to the client-side interface `name`.
    pub fn register_remote(&self, name: &str) {
        self.hub.registry.register_remote(name);
    }

    pub fn unregister_remote(&self, name: &str) -> bool {
        self.hub.registry.unregister_remote(name)
    }

    pub async fn start(&self, target: &str) -> Result<()> {
        self.stream.start(target).await
    }

    pub fn start_with(&self, acceptor: Box<dyn Acceptor>) -> Result<()> {
        self.stream.start_with(acceptor)
    }

    /// Stop accepting and close every client.
    pub async fn stop(&self) {
        self.stream.stop().await;
    }

    /// Call stub for `interface` on one client.
    ///
    /// # Errors
    ///
    /// `InterfaceNotRegistered` for an unregistered interface,
    /// `ClientDisconnected` if `id` is not connected.
    pub fn proxy_for_client(&self, id: ConnectionId, interface: &str) -> Result<CallProxy> {
        if !self.hub.registry.is_remote(interface) {
            return Err(WireError::InterfaceNotRegistered(interface.to_string()));
        }
        let session = self.stream.client(id).ok_or(WireError::ClientDisconnected(id))?;
        let channel = self.hub.get(id).ok_or(WireError::ClientDisconnected(id))?;
        Ok(CallProxy::new(interface, Arc::new(SessionInvoker { session, channel })))
    }

    /// One stub per connected client, ordered by client id.
    pub fn all_client_proxies(&self, interface: &str) -> Result<Vec<(ConnectionId, CallProxy)>> {
        let mut proxies = Vec::new();
        for id in self.stream.client_ids() {
            match self.proxy_for_client(id, interface) {
                Ok(proxy) => proxies.push((id, proxy)),
                // Raced with a disconnect.
                Err(WireError::ClientDisconnected(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(proxies)
    }

    /// Stub for the longest-connected client.
    ///
    /// # Errors
    ///
    /// `NotConnected` when no client is connected.
    pub fn first_client_proxy(&self, interface: &str) -> Result<CallProxy> {
        self.all_client_proxies(interface)?
            .into_iter()
            .next()
            .map(|(_, proxy)| proxy)
            .ok_or(WireError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::rpc::{RpcClient, ServiceBuilder};
    use crate::transport::memory_channel;

    struct Greeter {
        name: String,
    }

    fn greeter(name: &str) -> LocalService {
        ServiceBuilder::instance(
            "Greeter",
            Arc::new(Greeter {
                name: name.to_string(),
            }),
        )
        .method("Hello", |svc: Arc<Greeter>, (): ()| async move {
            Ok::<_, String>(format!("hello from {}", svc.name))
        })
        .build()
    }

    async fn connected_client(
        connector: &crate::transport::MemoryConnector,
        name: &str,
    ) -> RpcClient {
        let client = RpcClient::new(ClientConfig::default()).unwrap();
        client.add_local_service(greeter(name));
        assert!(client
            .connect_with(Arc::new(connector.clone()), Duration::from_secs(1))
            .await
            .unwrap());
        client
    }

    async fn wait_for_clients(server: &RpcServer, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.stream().client_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_server_calls_each_client() {
        let (connector, acceptor) = memory_channel("rpc-server");
        let server = RpcServer::new(ServerConfig::default()).unwrap();
        server.register_remote("Greeter");
        server.start_with(Box::new(acceptor)).unwrap();

        let a = connected_client(&connector, "a").await;
        let b = connected_client(&connector, "b").await;
        wait_for_clients(&server, 2).await;

        let proxies = server.all_client_proxies("Greeter").unwrap();
        assert_eq!(proxies.len(), 2);

        let mut replies = Vec::new();
        for (_, proxy) in &proxies {
            let reply: String = proxy.call("Hello", ()).await.unwrap();
            replies.push(reply);
        }
        replies.sort();
        assert_eq!(replies, vec!["hello from a", "hello from b"]);

        let first: String = server
            .first_client_proxy("Greeter")
            .unwrap()
            .call("Hello", ())
            .await
            .unwrap();
        assert_eq!(first, "hello from a");

        a.close().await;
        b.close().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_proxy_for_unknown_client() {
        let server = RpcServer::new(ServerConfig::default()).unwrap();
        server.register_remote("Greeter");
        assert!(matches!(
            server.proxy_for_client(999_999, "Greeter"),
            Err(WireError::ClientDisconnected(999_999))
        ));
        assert!(matches!(
            server.first_client_proxy("Greeter"),
            Err(WireError::NotConnected)
        ));
        assert!(matches!(
            server.proxy_for_client(1, "Other"),
            Err(WireError::InterfaceNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_call_to_departed_client_fails() {
        let (connector, acceptor) = memory_channel("rpc-departed");
        let server = RpcServer::new(ServerConfig::default()).unwrap();
        server.register_remote("Greeter");
        server.start_with(Box::new(acceptor)).unwrap();

        let client = connected_client(&connector, "gone").await;
        wait_for_clients(&server, 1).await;
        let id = server.stream().client_ids()[0];
        let proxy = server.proxy_for_client(id, "Greeter").unwrap();

        client.close().await;
        wait_for_clients_gone(&server).await;

        let err = proxy.call::<_, String>("Hello", ()).await.unwrap_err();
        assert!(matches!(err, WireError::ClientDisconnected(i) if i == id));
        server.stop().await;
    }

    async fn wait_for_clients_gone(server: &RpcServer) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.stream().client_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
