//! Typed call stubs for remote interfaces.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::args::IntoArgs;
use super::message::InvocationRequest;
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Something that can carry an invocation to a remote endpoint.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    async fn invoke(&self, request: InvocationRequest) -> Result<Bytes>;
}

/// Call stub bound to one remote interface.
///
/// Every call is packaged as an [`InvocationRequest`] and returns the
/// decoded result or the remote failure.
#[derive(Clone)]
pub struct CallProxy {
    interface: String,
    invoker: Arc<dyn Invoker>,
}

impl CallProxy {
    pub fn new(interface: impl Into<String>, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            interface: interface.into(),
            invoker,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Invoke `method` with `args` and decode the result as `R`.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        let payload = self.call_raw(method, args.into_args()?).await?;
        MsgPackCodec::decode(&payload)
    }

    /// Invoke with pre-encoded arguments and return the encoded result.
    pub async fn call_raw(&self, method: &str, args: Vec<Bytes>) -> Result<Bytes> {
        let request = InvocationRequest {
            interface: self.interface.clone(),
            method: method.to_string(),
            args,
        };
        self.invoker.invoke(request).await
    }
}

impl fmt::Debug for CallProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallProxy")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Hand-written typed client for a remote interface.
///
/// ```
/// use duplexwire::rpc::{CallProxy, RemoteService};
/// use duplexwire::Result;
///
/// struct EchoClient(CallProxy);
///
/// impl RemoteService for EchoClient {
///     const INTERFACE: &'static str = "Echo";
///
///     fn from_proxy(proxy: CallProxy) -> Self {
///         EchoClient(proxy)
///     }
/// }
///
/// impl EchoClient {
///     async fn call(&self, text: &str) -> Result<String> {
///         self.0.call("Call", (text,)).await
///     }
/// }
/// ```
pub trait RemoteService: Sized {
    /// Interface name the remote side registered.
    const INTERFACE: &'static str;

    fn from_proxy(proxy: CallProxy) -> Self;
}
