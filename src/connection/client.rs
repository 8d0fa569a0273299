//! Outbound connection with optional auto-reconnect.
//!
//! Status flow: Closed → Connecting → Connected → Closed. With
//! auto-reconnect an unexpected drop goes Connected → Connecting and the
//! client retries after the configured backoff until it succeeds or
//! [`StreamClient::close`] is called. The backoff wait is interruptible, so
//! `close` returns promptly even mid-wait.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use super::events::EventHub;
use super::session::{FrameRoute, Session};
use super::{ConnectionStatus, FrameInterceptor, FrameSink};
use crate::config::ClientConfig;
use crate::error::{Result, WireError};
use crate::group::{encode_join, encode_transmit};
use crate::protocol::{next_connection_id, ConnectionId, Frame, PacketSplitter};
use crate::transport::{Connector, StreamPair, Target};

/// Framed stream client.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: ConnectionId,
    config: ClientConfig,
    splitter: Arc<dyn PacketSplitter>,
    hub: EventHub,
    state: Mutex<ClientState>,
    interceptor: RwLock<Option<Arc<dyn FrameInterceptor>>>,
    // Membership re-announced after every reconnect.
    groups: Mutex<Vec<String>>,
}

#[derive(Default)]
struct ClientState {
    status: ConnectionStatus,
    running: bool,
    generation: u64,
    remote: String,
    session: Option<Arc<Session>>,
    stop: Option<watch::Sender<bool>>,
}

/// One connect/reconnect cycle, from `connect` until `close` or terminal drop.
#[derive(Clone)]
struct Run {
    generation: u64,
    connector: Arc<dyn Connector>,
    stop: watch::Receiver<bool>,
}

impl StreamClient {
    /// Create a closed client.
    ///
    /// # Errors
    ///
    /// Fails if the configured framing cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let splitter = config.framing.build()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                id: next_connection_id(),
                config,
                splitter,
                hub: EventHub::new(),
                state: Mutex::new(ClientState::default()),
                interceptor: RwLock::new(None),
                groups: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Connection id, stable across reconnects.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_state().status
    }

    /// True between a successful `connect` call and `close` (or terminal drop).
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Remote endpoint of the current or last connection.
    pub fn remote(&self) -> String {
        self.inner.lock_state().remote.clone()
    }

    /// Groups announced with [`join_group`](Self::join_group).
    pub fn groups(&self) -> Vec<String> {
        self.inner.groups.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Notification hub.
    pub fn events(&self) -> &EventHub {
        &self.inner.hub
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Install the inbound frame interceptor.
    pub fn set_interceptor(&self, interceptor: Arc<dyn FrameInterceptor>) {
        if let Ok(mut slot) = self.inner.interceptor.write() {
            *slot = Some(interceptor);
        }
    }

    /// Live session, if connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.lock_state().session.clone()
    }

    /// Connect to `target` and wait for the outcome.
    ///
    /// Returns `Ok(false)` when the attempt fails or times out.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` for an unparsable address, `AlreadyRunning` while a
    /// previous attempt or session is active.
    pub async fn connect(&self, target: &str, timeout: Duration) -> Result<bool> {
        let target = Target::parse(target)?;
        self.connect_with(Arc::new(target), timeout).await
    }

    /// Connect through a custom [`Connector`].
    pub async fn connect_with(&self, connector: Arc<dyn Connector>, timeout: Duration) -> Result<bool> {
        let run = self.inner.begin(connector)?;
        Ok(self.inner.clone().finish_connect(run, timeout).await)
    }

    /// Start connecting in the background and report through `callback`.
    ///
    /// Validation and the already-running check happen before returning.
    pub fn connect_async<F>(&self, target: &str, timeout: Duration, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let target = Target::parse(target)?;
        let run = self.inner.begin(Arc::new(target))?;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let connected = inner.finish_connect(run, timeout).await;
            callback(connected);
        });
        Ok(())
    }

    /// Close the connection and stop any reconnect loop.
    ///
    /// Idempotent; emits exactly one `Closed` notification.
    pub async fn close(&self) {
        let session = {
            let mut state = self.inner.lock_state();
            if !state.running {
                return;
            }
            state.running = false;
            if let Some(stop) = state.stop.take() {
                stop.send_replace(true);
            }
            self.inner.set_status(&mut state, ConnectionStatus::Closed);
            state.session.take()
        };

        if let Some(session) = session {
            session.mark_closed();
            session.close().await;
        }
        tracing::debug!("Client {} closed", self.inner.id);
    }

    /// Send one application message.
    ///
    /// # Errors
    ///
    /// `NotRunning` before `connect`, `NotConnected` while reconnecting.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.inner.current_session()?.send(payload).await
    }

    /// [`send`](Self::send) for UTF-8 text.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Replace this client's group membership on the server.
    ///
    /// The set is re-announced automatically after a reconnect.
    pub async fn join_group<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let frame = encode_join(names)?;
        self.inner.current_session()?.send(&frame).await?;
        if let Ok(mut groups) = self.inner.groups.lock() {
            *groups = names.iter().map(|n| n.as_ref().to_string()).collect();
        }
        Ok(())
    }

    /// Ask the server to forward `payload` to every member of `names`.
    ///
    /// With `loop_back` the sender receives its own message too.
    pub async fn send_group<S: AsRef<str>>(&self, names: &[S], payload: &[u8], loop_back: bool) -> Result<()> {
        let frame = encode_transmit(names, payload, loop_back)?;
        self.inner.current_session()?.send(&frame).await
    }

    pub async fn send_group_text<S: AsRef<str>>(&self, names: &[S], text: &str, loop_back: bool) -> Result<()> {
        self.send_group(names, text.as_bytes(), loop_back).await
    }
}

// Resolves the session per send, so holders keep working across reconnects.
#[async_trait]
impl FrameSink for StreamClient {
    async fn send_frame(&self, payload: &[u8]) -> Result<()> {
        self.send(payload).await
    }

    fn sink_id(&self) -> ConnectionId {
        self.inner.id
    }
}

impl ClientInner {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn interceptor(&self) -> Option<Arc<dyn FrameInterceptor>> {
        self.interceptor.read().ok().and_then(|i| i.clone())
    }

    fn current_session(&self) -> Result<Arc<Session>> {
        let state = self.lock_state();
        if !state.running {
            return Err(WireError::NotRunning);
        }
        state.session.clone().ok_or(WireError::NotConnected)
    }

    /// Emit only real transitions. Called with the state lock held so
    /// notifications keep issuance order.
    fn set_status(&self, state: &mut ClientState, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        state.status = status;
        self.hub.status(self.id, &state.remote, status);
    }

    fn begin(&self, connector: Arc<dyn Connector>) -> Result<Run> {
        let mut state = self.lock_state();
        if state.running {
            return Err(WireError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        state.running = true;
        state.generation += 1;
        state.stop = Some(stop_tx);
        state.remote = connector.describe();
        self.set_status(&mut state, ConnectionStatus::Connecting);

        Ok(Run {
            generation: state.generation,
            connector,
            stop: stop_rx,
        })
    }

    fn is_current(&self, run: &Run) -> bool {
        let state = self.lock_state();
        state.running && state.generation == run.generation
    }

    async fn finish_connect(self: Arc<Self>, run: Run, timeout: Duration) -> bool {
        match attempt(run.connector.as_ref(), timeout).await {
            Ok(pair) => self.attach(pair, run).await,
            Err(e) => {
                tracing::warn!("Connect to {} failed: {}", run.connector.describe(), e);
                let mut state = self.lock_state();
                if state.running && state.generation == run.generation {
                    state.running = false;
                    state.stop = None;
                    self.set_status(&mut state, ConnectionStatus::Closed);
                }
                false
            }
        }
    }

    /// Install a freshly connected stream and spawn its reader.
    async fn attach(self: Arc<Self>, pair: StreamPair, run: Run) -> bool {
        let StreamPair {
            reader,
            writer,
            remote,
        } = pair;
        let session = Arc::new(Session::new(self.id, remote.clone(), self.splitter.clone(), writer));

        {
            let mut state = self.lock_state();
            if !(state.running && state.generation == run.generation) {
                return false;
            }
            state.remote = remote;
            state.session = Some(session.clone());
        }

        if let Some(interceptor) = self.interceptor() {
            interceptor.on_connected(&session).await;
        }
        self.rejoin_groups(&session).await;

        {
            let mut state = self.lock_state();
            let current = state
                .session
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, &session));
            if current {
                self.set_status(&mut state, ConnectionStatus::Connected);
            }
        }
        tracing::debug!("Client {} connected to {}", self.id, session.remote());

        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.read_loop(reader, inner.as_ref()).await {
                tracing::warn!("Read loop error on {}: {}", session.remote(), e);
            }
            inner.on_disconnected(session, run).await;
        });
        true
    }

    async fn rejoin_groups(&self, session: &Session) {
        let groups = self.groups.lock().map(|g| g.clone()).unwrap_or_default();
        if groups.is_empty() {
            return;
        }
        let sent = match encode_join(&groups) {
            Ok(frame) => session.send(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!("Re-joining groups on {} failed: {}", session.remote(), e);
        }
    }

    // Boxed to break the attach → reader task → reconnect → attach type cycle.
    fn on_disconnected(self: Arc<Self>, session: Arc<Session>, run: Run) -> BoxFuture<'static, ()> {
        async move {
            session.mark_closed();
            if let Some(interceptor) = self.interceptor() {
                interceptor.on_closed(session.id()).await;
            }

            let reconnect = {
                let mut state = self.lock_state();
                let current = state
                    .session
                    .as_ref()
                    .is_some_and(|s| Arc::ptr_eq(s, &session));
                if !current {
                    return;
                }
                state.session = None;
                if !state.running {
                    return;
                }
                if self.config.auto_reconnect {
                    self.set_status(&mut state, ConnectionStatus::Connecting);
                    true
                } else {
                    state.running = false;
                    state.stop = None;
                    self.set_status(&mut state, ConnectionStatus::Closed);
                    false
                }
            };

            if reconnect {
                tracing::debug!("Client {} lost {}, reconnecting", self.id, session.remote());
                self.reconnect_loop(run).await;
            } else {
                tracing::debug!("Client {} disconnected from {}", self.id, session.remote());
            }
        }
        .boxed()
    }

    async fn reconnect_loop(self: Arc<Self>, mut run: Run) {
        let interval = self.config.reconnect_interval_duration();
        let timeout = self.config.connect_timeout_duration();

        loop {
            tokio::select! {
                _ = run.stop.wait_for(|stopped| *stopped) => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if !self.is_current(&run) {
                return;
            }

            match attempt(run.connector.as_ref(), timeout).await {
                Ok(pair) => {
                    self.attach(pair, run).await;
                    return;
                }
                Err(e) => {
                    tracing::debug!("Reconnect to {} failed: {}", run.connector.describe(), e);
                }
            }
        }
    }
}

async fn attempt(connector: &dyn Connector, timeout: Duration) -> Result<StreamPair> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Io(std::io::ErrorKind::TimedOut.into())),
    }
}

#[async_trait]
impl FrameRoute for ClientInner {
    async fn route(&self, session: &Arc<Session>, frame: Frame) {
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
