//! Error types for duplexwire.

use thiserror::Error;

/// Main error type for all duplexwire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, malformed envelope, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The endpoint has not been started.
    #[error("Not running")]
    NotRunning,

    /// A connection attempt or session is already active.
    #[error("Already running")]
    AlreadyRunning,

    /// No live connection to send on.
    #[error("Not connected")]
    NotConnected,

    /// Target address, port or pipe name could not be used.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No local implementation or remote registration for the interface.
    #[error("Interface not registered: {0}")]
    InterfaceNotRegistered(String),

    /// The interface exists but has no such method.
    #[error("Method not found: {interface}.{method}")]
    MethodNotFound {
        /// Interface name.
        interface: String,
        /// Method name.
        method: String,
    },

    /// Arguments could not be decoded for the target method.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The remote handler failed; carries the remote error message.
    #[error("Remote fault: {0}")]
    RemoteFault(String),

    /// No response arrived before the call deadline.
    #[error("Call timed out")]
    CallTimeout,

    /// The addressed server-side client is not connected.
    #[error("Client disconnected: {0}")]
    ClientDisconnected(u64),

    /// Group operation on a server started without group support.
    #[error("Group feature is disabled")]
    GroupsDisabled,
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
