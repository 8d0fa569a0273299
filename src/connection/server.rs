//! Accept loop and per-client sessions.
//!
//! Inbound frame order per client: group control frames are handled first
//! (when groups are enabled), then the installed [`FrameInterceptor`] gets a
//! chance to consume the frame, and whatever is left becomes a message event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;

use super::events::EventHub;
use super::session::{FrameRoute, Session};
use super::{ConnectionStatus, FrameInterceptor};
use crate::config::ServerConfig;
use crate::error::{Result, WireError};
use crate::group::{is_control_mark, ControlFrame, GroupRouter};
use crate::protocol::{next_connection_id, ConnectionId, Frame, PacketSplitter};
use crate::transport::{Acceptor, StreamPair, Target};

/// Accept failures in a row after which the listener is considered unusable.
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 8;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Framed stream server.
///
/// Cheap to clone; clones share the same listener and clients.
#[derive(Clone)]
pub struct StreamServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    splitter: Arc<dyn PacketSplitter>,
    hub: EventHub,
    clients: Mutex<HashMap<ConnectionId, Arc<Session>>>,
    groups: GroupRouter,
    state: Mutex<ServerState>,
    interceptor: RwLock<Option<Arc<dyn FrameInterceptor>>>,
}

#[derive(Default)]
struct ServerState {
    running: bool,
    local: String,
    stop: Option<watch::Sender<bool>>,
}

impl StreamServer {
    /// Create a stopped server.
    ///
    /// # Errors
    ///
    /// Fails if the configured framing cannot be built.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let splitter = config.framing.build()?;
        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                splitter,
                hub: EventHub::new(),
                clients: Mutex::new(HashMap::new()),
                groups: GroupRouter::new(),
                state: Mutex::new(ServerState::default()),
                interceptor: RwLock::new(None),
            }),
        })
    }

    /// Notification hub.
    pub fn events(&self) -> &EventHub {
        &self.inner.hub
    }

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Install the inbound frame interceptor.
    pub fn set_interceptor(&self, interceptor: Arc<dyn FrameInterceptor>) {
        if let Ok(mut slot) = self.inner.interceptor.write() {
            *slot = Some(interceptor);
        }
    }

    /// True while the accept loop runs.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Local endpoint description.
    pub fn local(&self) -> String {
        self.inner.lock_state().local.clone()
    }

    /// Bind `target` and start accepting.
    ///
    /// # Errors
    ///
    /// `InvalidTarget`, `AlreadyRunning`, or the bind error.
    pub async fn start(&self, target: &str) -> Result<()> {
        let target = Target::parse(target)?;
        if self.is_running() {
            return Err(WireError::AlreadyRunning);
        }
        let acceptor = target.bind().await?;
        self.start_with(acceptor)
    }

    /// Start accepting from an already bound [`Acceptor`].
    pub fn start_with(&self, acceptor: Box<dyn Acceptor>) -> Result<()> {
        let stop_rx = {
            let mut state = self.inner.lock_state();
            if state.running {
                return Err(WireError::AlreadyRunning);
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            state.running = true;
            state.local = acceptor.local();
            state.stop = Some(stop_tx);
            stop_rx
        };

        tracing::debug!("Server listening on {}", acceptor.local());
        tokio::spawn(self.inner.clone().accept_loop(acceptor, stop_rx));
        Ok(())
    }

    /// Stop accepting and close every client.
    ///
    /// Each client gets a final `Closed` notification. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }

    /// Send one application message to a client.
    ///
    /// # Errors
    ///
    /// `ClientDisconnected` for an unknown id; transport errors otherwise.
    pub async fn send_to(&self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        let session = self.client(id).ok_or(WireError::ClientDisconnected(id))?;
        session.send(payload).await
    }

    /// Send to every connected client; returns the number of successful sends.
    pub async fn broadcast(&self, payload: &[u8]) -> usize {
        let ids = self.client_ids();
        self.inner.fan_out(&ids, payload).await
    }

    /// [`send_to`](Self::send_to) for UTF-8 text.
    pub async fn send_text_to(&self, id: ConnectionId, text: &str) -> Result<()> {
        self.send_to(id, text.as_bytes()).await
    }

    pub async fn broadcast_text(&self, text: &str) -> usize {
        self.broadcast(text.as_bytes()).await
    }

    /// Disconnect one client.
    pub async fn close_client(&self, id: ConnectionId) -> Result<()> {
        let session = self.client(id).ok_or(WireError::ClientDisconnected(id))?;
        self.inner.close_session(&session).await;
        Ok(())
    }

    /// Session of a connected client.
    pub fn client(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.inner.lock_clients().get(&id).cloned()
    }

    /// Ids of all connected clients.
    pub fn client_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.inner.lock_clients().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.inner.lock_clients().len()
    }

    /// Add a client to a group without touching its other memberships.
    pub fn add_client_to_group(&self, id: ConnectionId, group: &str) -> Result<()> {
        self.inner.require_groups()?;
        let session = self.client(id).ok_or(WireError::ClientDisconnected(id))?;
        self.inner.groups.add(&session, group);
        Ok(())
    }

    /// Check group membership of a client.
    pub fn is_client_in_group(&self, id: ConnectionId, group: &str) -> bool {
        self.inner.groups.contains(group, id)
    }

    /// Members of a group.
    pub fn group_clients(&self, group: &str) -> Vec<ConnectionId> {
        let mut ids = self.inner.groups.members(&[group.to_string()], None);
        ids.sort_unstable();
        ids
    }

    /// Send to every member of `names`; returns the number of successful sends.
    pub async fn send_group<S: AsRef<str>>(&self, names: &[S], payload: &[u8]) -> Result<usize> {
        self.inner.require_groups()?;
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let ids = self.inner.groups.members(&names, None);
        Ok(self.inner.fan_out(&ids, payload).await)
    }

    pub async fn send_group_text<S: AsRef<str>>(&self, names: &[S], text: &str) -> Result<usize> {
        self.send_group(names, text.as_bytes()).await
    }
}

impl ServerInner {
    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Session>>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn interceptor(&self) -> Option<Arc<dyn FrameInterceptor>> {
        self.interceptor.read().ok().and_then(|i| i.clone())
    }

    fn is_running(&self) -> bool {
        self.lock_state().running
    }

    fn require_groups(&self) -> Result<()> {
        if self.config.enable_group {
            Ok(())
        } else {
            Err(WireError::GroupsDisabled)
        }
    }

    async fn accept_loop(self: Arc<Self>, acceptor: Box<dyn Acceptor>, mut stop: watch::Receiver<bool>) {
        let mut consecutive_errors = 0u32;

        loop {
            let accepted = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok(pair) => {
                    consecutive_errors = 0;
                    self.register(pair).await;
                }
                Err(e) => {
                    if !self.is_running() {
                        break;
                    }
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
                        tracing::error!(
                            "Listener {} unusable after {} accept errors, stopping: {}",
                            acceptor.local(),
                            consecutive_errors,
                            e
                        );
                        self.shutdown().await;
                        break;
                    }
                    tracing::warn!("Accept failed on {}: {}", acceptor.local(), e);
                    tokio::select! {
                        _ = stop.wait_for(|stopped| *stopped) => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }

        tracing::debug!("Accept loop on {} stopped", acceptor.local());
    }

    async fn register(self: &Arc<Self>, pair: StreamPair) {
        let StreamPair {
            reader,
            writer,
            remote,
        } = pair;
        let id = next_connection_id();
        let session = Arc::new(Session::new(id, remote, self.splitter.clone(), writer));

        // Same lock order as `shutdown`: a session is either in its snapshot
        // or never registered.
        {
            let state = self.lock_state();
            if !state.running {
                tracing::debug!("Dropped connection from {}, server stopped", session.remote());
                return;
            }
            self.lock_clients().insert(id, session.clone());
        }
        if let Some(interceptor) = self.interceptor() {
            interceptor.on_connected(&session).await;
        }
        {
            // Teardown removes from `clients` before emitting Closed, so
            // holding the lock here keeps Connected ahead of it.
            let _clients = self.lock_clients();
            if session.is_closed() {
                return;
            }
            self.hub.status(id, session.remote(), ConnectionStatus::Connected);
        }
        tracing::debug!("Accepted client {} from {}", id, session.remote());

        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.read_loop(reader, inner.as_ref()).await {
                tracing::warn!("Read loop error on client {}: {}", session.id(), e);
            }
            inner.teardown(&session).await;
        });
    }

    /// Remove a session everywhere. Only the first call has an effect.
    async fn teardown(&self, session: &Session) {
        if !session.mark_closed() {
            return;
        }
        let id = session.id();
        self.lock_clients().remove(&id);
        self.groups.remove_session(session);
        if let Some(interceptor) = self.interceptor() {
            interceptor.on_closed(id).await;
        }
        self.hub.status(id, session.remote(), ConnectionStatus::Closed);
        tracing::debug!("Client {} disconnected", id);
    }

    async fn close_session(&self, session: &Session) {
        session.close().await;
        self.teardown(session).await;
    }

    async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.lock_state();
            if !state.running {
                return;
            }
            state.running = false;
            if let Some(stop) = state.stop.take() {
                stop.send_replace(true);
            }
            self.lock_clients().values().cloned().collect()
        };

        join_all(sessions.iter().map(|s| self.close_session(s))).await;
        tracing::debug!("Server stopped");
    }

    /// Independent sends to each id; one failure does not affect the others.
    async fn fan_out(&self, ids: &[ConnectionId], payload: &[u8]) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let clients = self.lock_clients();
            ids.iter().filter_map(|id| clients.get(id).cloned()).collect()
        };

        let results = join_all(sessions.iter().map(|s| s.send(payload))).await;
        let mut delivered = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Send to client {} failed: {}", session.id(), e),
            }
        }
        delivered
    }

    async fn handle_control(&self, session: &Session, frame: Frame) {
        if !self.config.enable_group {
            tracing::debug!("Group frame from client {} ignored, groups disabled", session.id());
            return;
        }

        let control = match ControlFrame::parse(&frame.payload) {
            Ok(control) => control,
            Err(e) => {
                tracing::debug!("Malformed group frame from client {}: {}", session.id(), e);
                return;
            }
        };

        match control {
            ControlFrame::Join(names) => self.groups.join(session, names),
            ControlFrame::Transmit {
                groups,
                loop_back,
                payload,
            } => {
                if !self.config.allow_cross_group_message && !session.member_of_all(&groups) {
                    tracing::debug!("Dropped cross-group transmit from client {}", session.id());
                    return;
                }
                let exclude = if loop_back { None } else { Some(session.id()) };
                let members = self.groups.members(&groups, exclude);
                self.fan_out(&members, &payload).await;
            }
        }
    }
}

#[async_trait]
impl FrameRoute for ServerInner {
    async fn route(&self, session: &Arc<Session>, frame: Frame) {
        if frame.leading_mark().is_some_and(is_control_mark) {
            self.handle_control(session, frame).await;
            return;
        }

        let frame = match self.interceptor() {
            Some(interceptor) => match interceptor.on_frame(session, frame).await {
                Some(frame) => frame,
                None => return,
            },
            None => frame,
        };
        self.hub.message(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEvent;
    use crate::transport::{memory_channel, Connector};

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_connector, acceptor) = memory_channel("srv");
        let (_c2, acceptor2) = memory_channel("srv2");
        let server = StreamServer::new(ServerConfig::default()).unwrap();

        server.start_with(Box::new(acceptor)).unwrap();
        assert!(matches!(
            server.start_with(Box::new(acceptor2)),
            Err(WireError::AlreadyRunning)
        ));
        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_accept_assigns_unique_ids() {
        let (connector, acceptor) = memory_channel("srv");
        let server = StreamServer::new(ServerConfig::default()).unwrap();
        let mut events = server.events().subscribe();
        server.start_with(Box::new(acceptor)).unwrap();

        let _a = connector.connect().await.unwrap();
        let _b = connector.connect().await.unwrap();

        let mut ids = Vec::new();
        while ids.len() < 2 {
            if let Some(ConnectionEvent::Status {
                connection_id,
                status: ConnectionStatus::Connected,
                ..
            }) = events.recv().await
            {
                ids.push(connection_id);
            }
        }
        assert_ne!(ids[0], ids[1]);
        assert_eq!(server.client_count(), 2);
        server.stop().await;
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_client_is_disconnected_error() {
        let server = StreamServer::new(ServerConfig::default()).unwrap();
        assert!(matches!(
            server.send_to(999_999, b"x").await,
            Err(WireError::ClientDisconnected(999_999))
        ));
        assert!(matches!(
            server.close_client(999_999).await,
            Err(WireError::ClientDisconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_group_api_requires_enable_group() {
        let server = StreamServer::new(ServerConfig::default()).unwrap();
        assert!(matches!(
            server.add_client_to_group(1, "g"),
            Err(WireError::GroupsDisabled)
        ));
        assert!(matches!(
            server.send_group(&["g"], b"x").await,
            Err(WireError::GroupsDisabled)
        ));
    }

    /// Holds every new session in `on_connected` until released.
    struct Gate {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl FrameInterceptor for Gate {
        async fn on_connected(&self, _session: &Arc<Session>) {
            self.entered.notify_one();
            self.release.notified().await;
        }

        async fn on_frame(&self, _session: &Arc<Session>, frame: Frame) -> Option<Frame> {
            Some(frame)
        }
    }

    #[tokio::test]
    async fn test_stop_during_registration_leaves_no_client() {
        use tokio::io::AsyncReadExt;

        let (connector, acceptor) = memory_channel("racing");
        let server = StreamServer::new(ServerConfig::default()).unwrap();
        let mut events = server.events().subscribe();
        let gate = Arc::new(Gate {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        server.set_interceptor(gate.clone());
        server.start_with(Box::new(acceptor)).unwrap();

        let mut client_side = connector.connect().await.unwrap();
        gate.entered.notified().await;
        server.stop().await;
        gate.release.notify_one();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client_side.reader.read(&mut buf))
            .await
            .expect("connection left open after stop");
        assert_eq!(read.unwrap(), 0);
        assert_eq!(server.client_count(), 0);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert!(matches!(
            event,
            Some(ConnectionEvent::Status {
                status: ConnectionStatus::Closed,
                ..
            })
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broken_listener_stops_server() {
        let (connector, acceptor) = memory_channel("dying");
        drop(connector);

        let server = StreamServer::new(ServerConfig::default()).unwrap();
        server.start_with(Box::new(acceptor)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while server.is_running() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }
}
