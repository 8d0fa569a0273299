//! Request and response bodies.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// One remote method invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub interface: String,
    pub method: String,
    /// Each argument encoded on its own, in declaration order.
    pub args: Vec<Bytes>,
}

/// Category of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    InterfaceNotRegistered,
    MethodNotFound,
    InvalidArguments,
    Handler,
}

/// A failure reported by the callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub interface: String,
    pub method: String,
}

impl Fault {
    pub fn new(kind: FaultKind, request: &InvocationRequest, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            interface: request.interface.clone(),
            method: request.method.clone(),
        }
    }

    pub(crate) fn interface_not_registered(request: &InvocationRequest) -> Self {
        Self::new(
            FaultKind::InterfaceNotRegistered,
            request,
            format!("Interface not registered: {}", request.interface),
        )
    }

    pub(crate) fn method_not_found(request: &InvocationRequest) -> Self {
        Self::new(
            FaultKind::MethodNotFound,
            request,
            format!("Method not found: {}.{}", request.interface, request.method),
        )
    }
}

impl From<Fault> for WireError {
    fn from(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::InterfaceNotRegistered => WireError::InterfaceNotRegistered(fault.interface),
            FaultKind::MethodNotFound => WireError::MethodNotFound {
                interface: fault.interface,
                method: fault.method,
            },
            FaultKind::InvalidArguments => WireError::InvalidArguments(fault.message),
            FaultKind::Handler => WireError::RemoteFault(fault.message),
        }
    }
}

/// Outcome of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub ok: bool,
    /// Encoded return value; empty on failure.
    pub payload: Bytes,
    pub fault: Option<Fault>,
}

impl InvocationResponse {
    /// Successful response.
    pub fn success(payload: Bytes) -> Self {
        Self {
            ok: true,
            payload,
            fault: None,
        }
    }

    /// Failed response.
    pub fn failure(fault: Fault) -> Self {
        Self {
            ok: false,
            payload: Bytes::new(),
            fault: Some(fault),
        }
    }

    /// Convert into the encoded return value or the matching error.
    pub fn into_result(self) -> Result<Bytes, WireError> {
        match (self.ok, self.fault) {
            (true, _) => Ok(self.payload),
            (false, Some(fault)) => Err(fault.into()),
            (false, None) => Err(WireError::RemoteFault("unspecified remote failure".to_string())),
        }
    }
}
