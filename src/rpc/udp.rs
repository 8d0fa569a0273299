//! Connectionless RPC over UDP.
//!
//! One datagram carries one request or one response; there is no framing
//! and no session. Requests carry the caller's listening port so the server
//! can answer to `(source ip, reply port)`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::channel::RpcChannel;
use super::envelope::{encode_frame, RpcHeader, RpcKind};
use super::message::{InvocationRequest, InvocationResponse};
use super::pending::PendingCalls;
use super::proxy::{CallProxy, Invoker};
use super::registry::{LocalService, ServiceRegistry};
use crate::codec::MsgPackCodec;
use crate::config::DEFAULT_CALL_TIMEOUT;
use crate::error::{Result, WireError};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Pause after a failed receive before polling the socket again.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Wait out [`RECV_RETRY_DELAY`]. Returns false if `stop` fires first.
async fn pause_after_error(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => false,
        _ = tokio::time::sleep(RECV_RETRY_DELAY) => true,
    }
}

async fn bind(addr: &str) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| WireError::InvalidTarget(format!("{}: {}", addr, e)))
}

fn check_size(frame: &[u8]) -> Result<()> {
    if frame.len() > MAX_DATAGRAM_SIZE {
        return Err(WireError::Protocol(format!(
            "datagram of {} bytes exceeds {} bytes",
            frame.len(),
            MAX_DATAGRAM_SIZE
        )));
    }
    Ok(())
}

/// Serves local services to UDP callers.
pub struct UdpRpcServer {
    channel: Arc<RpcChannel>,
    running: Mutex<Option<(SocketAddr, watch::Sender<bool>)>>,
}

impl UdpRpcServer {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(RpcChannel::new(Arc::new(ServiceRegistry::new()), None)),
            running: Mutex::new(None),
        }
    }

    pub fn add_local_service(&self, service: LocalService) {
        self.channel.registry().add_local(service);
    }

    pub fn remove_local_service(&self, name: &str) -> bool {
        self.channel.registry().remove_local(name)
    }

    /// Listen on every interface at `port`.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        self.start_on(&format!("0.0.0.0:{}", port)).await
    }

    /// Listen on `addr`; returns the bound address.
    pub async fn start_on(&self, addr: &str) -> Result<SocketAddr> {
        if self.local_addr().is_some() {
            return Err(WireError::AlreadyRunning);
        }
        let socket = Arc::new(bind(addr).await?);
        let local = socket.local_addr()?;

        let stop_rx = {
            let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
            if running.is_some() {
                return Err(WireError::AlreadyRunning);
            }
            let (tx, rx) = watch::channel(false);
            *running = Some((local, tx));
            rx
        };

        tokio::spawn(serve_loop(socket, self.channel.clone(), stop_rx));
        tracing::debug!("UDP RPC server listening on {}", local);
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|(addr, _)| *addr)
    }

    pub fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some((addr, stop)) = running {
            stop.send_replace(true);
            tracing::debug!("UDP RPC server on {} stopped", addr);
        }
    }
}

impl Default for UdpRpcServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn serve_loop(socket: Arc<UdpSocket>, channel: Arc<RpcChannel>, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => return,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, source) = match received {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!("UDP receive failed: {}", e);
                if !pause_after_error(&mut stop).await {
                    return;
                }
                continue;
            }
        };

        let Some((header, offset)) = RpcHeader::decode(&buf[..n], true) else {
            tracing::debug!("Ignored non-RPC datagram from {}", source);
            continue;
        };
        if header.kind != RpcKind::Request {
            continue;
        }
        let reply_to = SocketAddr::new(source.ip(), header.reply_port.unwrap_or(source.port()));
        let body = Bytes::copy_from_slice(&buf[offset..n]);

        let socket = socket.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            let response = channel.serve(&body).await;
            let local_port = socket.local_addr().map(|a| a.port()).unwrap_or(0);
            let header = RpcHeader::with_reply_port(RpcKind::Response, header.call_id, local_port);
            let sent = match encode_frame(&header, &response) {
                Ok(frame) => match check_size(&frame) {
                    Ok(()) => socket.send_to(&frame, reply_to).await.map(|_| ()).map_err(WireError::Io),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                tracing::debug!("Response for call {} to {} not sent: {}", header.call_id, reply_to, e);
            }
        });
    }
}

/// Calls UDP RPC servers.
///
/// Each remote interface is bound to a server address with
/// [`register_remote`](Self::register_remote).
#[derive(Clone)]
pub struct UdpRpcClient {
    inner: Arc<UdpClientInner>,
}

struct UdpClientInner {
    socket: Arc<UdpSocket>,
    reply_port: u16,
    pending: Arc<PendingCalls>,
    remotes: RwLock<HashMap<String, SocketAddr>>,
    timeout: RwLock<Option<Duration>>,
    stop: watch::Sender<bool>,
}

impl UdpRpcClient {
    /// Listen for responses on every interface at `port` (0 picks one).
    pub async fn start(port: u16) -> Result<Self> {
        Self::start_on(&format!("0.0.0.0:{}", port)).await
    }

    /// Listen for responses on `addr`.
    pub async fn start_on(addr: &str) -> Result<Self> {
        let socket = Arc::new(bind(addr).await?);
        let reply_port = socket.local_addr()?.port();
        let pending = Arc::new(PendingCalls::new());
        let (stop, stop_rx) = watch::channel(false);

        tokio::spawn(response_loop(socket.clone(), pending.clone(), stop_rx));

        Ok(Self {
            inner: Arc::new(UdpClientInner {
                socket,
                reply_port,
                pending,
                remotes: RwLock::new(HashMap::new()),
                timeout: RwLock::new(Some(DEFAULT_CALL_TIMEOUT)),
                stop,
            }),
        })
    }

    /// Port responses are received on.
    pub fn reply_port(&self) -> u16 {
        self.inner.reply_port
    }

    /// Per-call deadline; `None` waits until [`stop`](Self::stop).
    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        if let Ok(mut slot) = self.inner.timeout.write() {
            *slot = timeout;
        }
    }

    /// Bind the remote `interface` to the server at `addr`.
    pub async fn register_remote(&self, interface: &str, addr: &str) -> Result<()> {
        let server = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| WireError::InvalidTarget(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| WireError::InvalidTarget(addr.to_string()))?;
        if let Ok(mut remotes) = self.inner.remotes.write() {
            remotes.insert(interface.to_string(), server);
        }
        Ok(())
    }

    pub fn unregister_remote(&self, interface: &str) -> bool {
        self.inner
            .remotes
            .write()
            .map(|mut remotes| remotes.remove(interface).is_some())
            .unwrap_or(false)
    }

    /// Call stub for a registered remote interface.
    pub fn proxy(&self, interface: &str) -> Result<CallProxy> {
        self.inner.server_for(interface)?;
        Ok(CallProxy::new(interface, self.inner.clone()))
    }

    pub fn is_running(&self) -> bool {
        !*self.inner.stop.borrow()
    }

    /// Stop receiving; outstanding calls fail with `ConnectionClosed`.
    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
        self.inner.pending.fail_all();
    }
}

impl UdpClientInner {
    fn server_for(&self, interface: &str) -> Result<SocketAddr> {
        self.remotes
            .read()
            .ok()
            .and_then(|remotes| remotes.get(interface).copied())
            .ok_or_else(|| WireError::InterfaceNotRegistered(interface.to_string()))
    }
}

#[async_trait]
impl Invoker for UdpClientInner {
    async fn invoke(&self, request: InvocationRequest) -> Result<Bytes> {
        if *self.stop.borrow() {
            return Err(WireError::NotRunning);
        }
        let server = self.server_for(&request.interface)?;

        let pending = self.pending.register();
        let header = RpcHeader::with_reply_port(RpcKind::Request, pending.id(), self.reply_port);
        let frame = encode_frame(&header, &request)?;
        check_size(&frame)?;
        self.socket.send_to(&frame, server).await?;

        let timeout = self.timeout.read().ok().and_then(|t| *t);
        pending.wait(timeout).await
    }
}

async fn response_loop(socket: Arc<UdpSocket>, pending: Arc<PendingCalls>, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => return,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, source) = match received {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!("UDP receive failed: {}", e);
                if !pause_after_error(&mut stop).await {
                    return;
                }
                continue;
            }
        };

        let Some((header, offset)) = RpcHeader::decode(&buf[..n], true) else {
            continue;
        };
        if header.kind != RpcKind::Response {
            tracing::debug!("Ignored request datagram from {}", source);
            continue;
        }
        match MsgPackCodec::decode::<InvocationResponse>(&buf[offset..n]) {
            Ok(response) => {
                if !pending.complete(header.call_id, response) {
                    tracing::debug!("Dropped late response for call {}", header.call_id);
                }
            }
            Err(e) => tracing::warn!("Malformed response from {}: {}", source, e),
        }
    }
}
