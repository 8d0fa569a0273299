//! Serialized notification delivery.
//!
//! Every endpoint owns one [`EventHub`]. Reader tasks push events into an
//! unbounded queue and move on; a single worker task drains the queue and
//! runs callbacks one at a time, then forwards the event to channel
//! subscribers. Slow callbacks therefore delay later notifications but never
//! block reads, and events are delivered in the order they were emitted.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::ConnectionStatus;
use crate::protocol::{ConnectionId, Frame};

/// A notification emitted by a client or server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection changed state.
    Status {
        /// Connection the change applies to.
        connection_id: ConnectionId,
        /// Remote endpoint description.
        remote: String,
        /// New state.
        status: ConnectionStatus,
    },
    /// An application frame arrived (control and RPC frames are filtered).
    Message(Frame),
}

type StatusCallback = Arc<dyn Fn(ConnectionId, &str, ConnectionStatus) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    status: Mutex<Vec<StatusCallback>>,
    message: Mutex<Vec<MessageCallback>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
}

/// Per-endpoint notification queue with a dedicated worker.
pub struct EventHub {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
    // Taken by the first emit, which spawns the worker on the current runtime.
    rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    listeners: Arc<Listeners>,
}

impl EventHub {
    /// Create an idle hub. The worker starts with the first event.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Register a status callback.
    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(ConnectionId, &str, ConnectionStatus) + Send + Sync + 'static,
    {
        if let Ok(mut list) = self.listeners.status.lock() {
            list.push(Arc::new(callback));
        }
    }

    /// Register a message callback.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        if let Ok(mut list) = self.listeners.message.lock() {
            list.push(Arc::new(callback));
        }
    }

    /// Receive every subsequent event on a channel.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut list) = self.listeners.subscribers.lock() {
            list.push(tx);
        }
        rx
    }

    pub(crate) fn status(&self, connection_id: ConnectionId, remote: &str, status: ConnectionStatus) {
        self.emit(ConnectionEvent::Status {
            connection_id,
            remote: remote.to_string(),
            status,
        });
    }

    pub(crate) fn message(&self, frame: Frame) {
        self.emit(ConnectionEvent::Message(frame));
    }

    fn emit(&self, event: ConnectionEvent) {
        self.ensure_worker();
        // The worker only stops once the hub itself is dropped.
        let _ = self.tx.send(event);
    }

    fn ensure_worker(&self) {
        let Ok(mut slot) = self.rx.lock() else {
            return;
        };
        if let Some(rx) = slot.take() {
            tokio::spawn(run_worker(rx, self.listeners.clone()));
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<ConnectionEvent>, listeners: Arc<Listeners>) {
    while let Some(event) = rx.recv().await {
        deliver(&listeners, &event);
    }
}

fn deliver(listeners: &Listeners, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Status {
            connection_id,
            remote,
            status,
        } => {
            let callbacks = snapshot(&listeners.status);
            for callback in callbacks {
                guarded(|| callback(*connection_id, remote, *status));
            }
        }
        ConnectionEvent::Message(frame) => {
            let callbacks = snapshot(&listeners.message);
            for callback in callbacks {
                guarded(|| callback(frame));
            }
        }
    }

    if let Ok(mut subscribers) = listeners.subscribers.lock() {
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn snapshot<T: Clone>(list: &Mutex<Vec<T>>) -> Vec<T> {
    list.lock().map(|l| l.clone()).unwrap_or_default()
}

fn guarded<F: FnOnce()>(f: F) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("Event callback panicked");
    }
}
