//! Request/response multiplexing over one framed connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::envelope::{encode_frame, RpcHeader, RpcKind};
use super::message::{Fault, FaultKind, InvocationRequest, InvocationResponse};
use super::pending::PendingCalls;
use super::registry::ServiceRegistry;
use crate::codec::MsgPackCodec;
use crate::connection::FrameSink;
use crate::error::{Result, WireError};
use crate::protocol::Frame;

/// Correlates outgoing calls with their responses and serves incoming
/// requests from a [`ServiceRegistry`].
///
/// Any number of calls may be in flight at once; responses may arrive in
/// any order.
pub struct RpcChannel {
    pending: PendingCalls,
    registry: Arc<ServiceRegistry>,
    timeout: Option<Duration>,
}

impl RpcChannel {
    /// `timeout` of `None` waits until a response arrives or the connection
    /// closes.
    pub fn new(registry: Arc<ServiceRegistry>, timeout: Option<Duration>) -> Self {
        Self {
            pending: PendingCalls::new(),
            registry,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` through `sink` and wait for the matching response.
    ///
    /// # Errors
    ///
    /// - send failures from the sink
    /// - `CallTimeout` when the deadline passes
    /// - `ConnectionClosed` when the connection drops first
    /// - the callee's fault, mapped to the matching error variant
    pub async fn call(&self, sink: &dyn FrameSink, request: InvocationRequest) -> Result<Bytes> {
        let pending = self.pending.register();
        let call_id = pending.id();

        let frame = encode_frame(&RpcHeader::new(RpcKind::Request, call_id), &request)?;
        sink.send_frame(&frame).await?;

        let result = pending.wait(self.timeout).await;
        if matches!(result, Err(WireError::CallTimeout)) {
            tracing::debug!(
                "Call {} to {}.{} timed out",
                call_id,
                request.interface,
                request.method
            );
        }
        result
    }

    /// Consume RPC frames; anything else is handed back untouched.
    ///
    /// Responses complete their waiting call. Requests are dispatched on a
    /// separate task so a slow handler never stalls the reader.
    pub fn handle_frame(self: &Arc<Self>, sink: Arc<dyn FrameSink>, frame: Frame) -> Option<Frame> {
        let Some((header, offset)) = RpcHeader::decode(&frame.payload, false) else {
            return Some(frame);
        };
        let body = frame.payload.slice(offset..);

        match header.kind {
            RpcKind::Response => {
                match MsgPackCodec::decode::<InvocationResponse>(&body) {
                    Ok(response) => {
                        if !self.pending.complete(header.call_id, response) {
                            tracing::debug!("Dropped late response for call {}", header.call_id);
                        }
                    }
                    Err(e) => tracing::warn!("Malformed response for call {}: {}", header.call_id, e),
                }
            }
            RpcKind::Request => {
                let channel = self.clone();
                tokio::spawn(async move {
                    let response = channel.serve(&body).await;
                    let reply = encode_frame(&RpcHeader::new(RpcKind::Response, header.call_id), &response);
                    let sent = match reply {
                        Ok(reply) => sink.send_frame(&reply).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        tracing::debug!(
                            "Response for call {} on connection {} not sent: {}",
                            header.call_id,
                            sink.sink_id(),
                            e
                        );
                    }
                });
            }
        }
        None
    }

    /// Decode and dispatch a request body.
    pub(crate) async fn serve(&self, body: &[u8]) -> InvocationResponse {
        match MsgPackCodec::decode::<InvocationRequest>(body) {
            Ok(request) => self.registry.dispatch(request).await,
            Err(e) => InvocationResponse::failure(Fault {
                kind: FaultKind::InvalidArguments,
                message: format!("malformed request: {}", e),
                interface: String::new(),
                method: String::new(),
            }),
        }
    }

    /// Fail every outstanding call with `ConnectionClosed`.
    pub fn fail_pending(&self) -> usize {
        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::debug!("Failed {} outstanding calls", failed);
        }
        failed
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("in_flight", &self.in_flight())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
