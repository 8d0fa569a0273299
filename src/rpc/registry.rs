//! Service registration and dispatch.
//!
//! Local services are described once, at registration time, by a dispatch
//! table: method name → thunk that decodes the arguments, runs the handler
//! and encodes the return value. The registry also records which interface
//! names are callable on the remote side.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use duplexwire::rpc::ServiceBuilder;
//!
//! struct Echo;
//!
//! let service = ServiceBuilder::instance("Echo", Arc::new(Echo))
//!     .method("Call", |_svc: Arc<Echo>, (text,): (String,)| async move {
//!         if text.is_empty() {
//!             return Err("empty input".to_string());
//!         }
//!         Ok(text)
//!     })
//!     .build();
//!
//! assert_eq!(service.name(), "Echo");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use super::args::FromArgs;
use super::message::{Fault, FaultKind, InvocationRequest, InvocationResponse};
use crate::codec::MsgPackCodec;

/// Why a method thunk failed, before the request context is attached.
#[derive(Debug)]
struct MethodFailure {
    kind: FaultKind,
    message: String,
}

impl MethodFailure {
    fn new(kind: FaultKind, message: impl Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

type MethodResult = std::result::Result<Bytes, MethodFailure>;
type Thunk = Arc<dyn Fn(Vec<Bytes>) -> BoxFuture<'static, MethodResult> + Send + Sync>;
type BoundMethod<S> = Arc<dyn Fn(Arc<S>, Vec<Bytes>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

enum Source<S> {
    Instance(Arc<S>),
    Factory(Arc<dyn Fn() -> S + Send + Sync>),
}

/// Builder for a [`LocalService`].
pub struct ServiceBuilder<S: Send + Sync + 'static> {
    name: String,
    source: Source<S>,
    methods: HashMap<String, BoundMethod<S>>,
}

impl<S: Send + Sync + 'static> ServiceBuilder<S> {
    /// Serve every call from one shared instance.
    pub fn instance(name: impl Into<String>, instance: Arc<S>) -> Self {
        Self {
            name: name.into(),
            source: Source::Instance(instance),
            methods: HashMap::new(),
        }
    }

    /// Create a fresh instance for every call.
    pub fn factory<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: Source::Factory(Arc::new(factory)),
            methods: HashMap::new(),
        }
    }

    /// Add a method.
    ///
    /// The handler receives the service instance and the decoded argument
    /// tuple. Its error is sent to the caller as a handler fault carrying
    /// the error's `Display` text.
    pub fn method<A, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: FromArgs + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let bound: BoundMethod<S> = Arc::new(move |svc: Arc<S>, raw: Vec<Bytes>| {
            let args = match A::from_args(&raw) {
                Ok(args) => args,
                Err(e) => {
                    let failure = MethodFailure::new(FaultKind::InvalidArguments, e);
                    return async move { Err(failure) }.boxed();
                }
            };

            let fut = handler(svc, args);
            async move {
                let value = fut
                    .await
                    .map_err(|e| MethodFailure::new(FaultKind::Handler, e))?;
                MsgPackCodec::encode_bytes(&value).map_err(|e| MethodFailure::new(FaultKind::Handler, e))
            }
            .boxed()
        });

        self.methods.insert(name.to_string(), bound);
        self
    }

    /// Freeze the dispatch table.
    pub fn build(self) -> LocalService {
        let resolve: Arc<dyn Fn() -> Arc<S> + Send + Sync> = match self.source {
            Source::Instance(instance) => Arc::new(move || instance.clone()),
            Source::Factory(factory) => Arc::new(move || Arc::new(factory())),
        };

        let methods = self
            .methods
            .into_iter()
            .map(|(name, bound)| {
                let resolve = resolve.clone();
                let thunk: Thunk = Arc::new(move |args| bound(resolve(), args));
                (name, thunk)
            })
            .collect();

        LocalService {
            name: self.name,
            methods,
        }
    }
}

/// A registered local implementation with its dispatch table.
pub struct LocalService {
    name: String,
    methods: HashMap<String, Thunk>,
}

impl LocalService {
    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for LocalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalService")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Local implementations and remote capability set of one endpoint.
///
/// The two scopes are independent: an interface may be both served locally
/// and called remotely.
#[derive(Default)]
pub struct ServiceRegistry {
    local: RwLock<HashMap<String, Arc<LocalService>>>,
    remote: RwLock<HashSet<String>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a local implementation.
    pub fn add_local(&self, service: LocalService) {
        if let Ok(mut local) = self.local.write() {
            local.insert(service.name.clone(), Arc::new(service));
        }
    }

    /// Remove a local implementation.
    pub fn remove_local(&self, name: &str) -> bool {
        self.local
            .write()
            .map(|mut local| local.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.local.read().map(|l| l.contains_key(name)).unwrap_or(false)
    }

    /// Mark an interface as callable on the remote side.
    pub fn register_remote(&self, name: &str) {
        if let Ok(mut remote) = self.remote.write() {
            remote.insert(name.to_string());
        }
    }

    pub fn unregister_remote(&self, name: &str) -> bool {
        self.remote
            .write()
            .map(|mut remote| remote.remove(name))
            .unwrap_or(false)
    }

    pub fn is_remote(&self, name: &str) -> bool {
        self.remote.read().map(|r| r.contains(name)).unwrap_or(false)
    }

    /// Run a request against the local dispatch table.
    ///
    /// Never fails: unknown names, argument errors, handler errors and
    /// handler panics all become fault responses.
    pub async fn dispatch(&self, mut request: InvocationRequest) -> InvocationResponse {
        let thunk = {
            let service = self
                .local
                .read()
                .ok()
                .and_then(|local| local.get(&request.interface).cloned());
            let Some(service) = service else {
                return InvocationResponse::failure(Fault::interface_not_registered(&request));
            };
            let Some(thunk) = service.methods.get(&request.method).cloned() else {
                return InvocationResponse::failure(Fault::method_not_found(&request));
            };
            thunk
        };

        let args = std::mem::take(&mut request.args);
        let outcome = AssertUnwindSafe(async move { thunk(args).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(payload)) => InvocationResponse::success(payload),
            Ok(Err(failure)) => {
                InvocationResponse::failure(Fault::new(failure.kind, &request, failure.message))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    "Handler {}.{} panicked: {}",
                    request.interface,
                    request.method,
                    message
                );
                InvocationResponse::failure(Fault::new(FaultKind::Handler, &request, message))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rpc::IntoArgs;

    struct Echo;

    fn echo_service() -> LocalService {
        ServiceBuilder::instance("Echo", Arc::new(Echo))
            .method("Call", |_svc, (text,): (String,)| async move {
                if text.is_empty() {
                    Err("empty input".to_string())
                } else {
                    Ok(text)
                }
            })
            .method("Panic", |_svc, (): ()| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<(), String>(())
            })
            .build()
    }

    fn request(interface: &str, method: &str, args: impl IntoArgs) -> InvocationRequest {
        InvocationRequest {
            interface: interface.to_string(),
            method: method.to_string(),
            args: args.into_args().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = ServiceRegistry::new();
        registry.add_local(echo_service());

        let response = registry.dispatch(request("Echo", "Call", ("hi",))).await;
        let value: String = MsgPackCodec::decode(&response.into_result().unwrap()).unwrap();
        assert_eq!(value, "hi");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_fault() {
        let registry = ServiceRegistry::new();
        registry.add_local(echo_service());

        let response = registry.dispatch(request("Echo", "Call", ("",))).await;
        let fault = response.fault.unwrap();
        assert_eq!(fault.kind, FaultKind::Handler);
        assert_eq!(fault.message, "empty input");
    }

    #[tokio::test]
    async fn test_unknown_interface_and_method() {
        let registry = ServiceRegistry::new();
        registry.add_local(echo_service());

        let fault = registry
            .dispatch(request("Nope", "Call", ()))
            .await
            .fault
            .unwrap();
        assert_eq!(fault.kind, FaultKind::InterfaceNotRegistered);
        assert!(fault.message.contains("Nope"));

        let fault = registry
            .dispatch(request("Echo", "Shout", ()))
            .await
            .fault
            .unwrap();
        assert_eq!(fault.kind, FaultKind::MethodNotFound);
        assert!(fault.message.contains("Echo.Shout"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_arguments_fault() {
        let registry = ServiceRegistry::new();
        registry.add_local(echo_service());

        let fault = registry
            .dispatch(request("Echo", "Call", (1u8, 2u8)))
            .await
            .fault
            .unwrap();
        assert_eq!(fault.kind, FaultKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let registry = ServiceRegistry::new();
        registry.add_local(echo_service());

        let fault = registry
            .dispatch(request("Echo", "Panic", ()))
            .await
            .fault
            .unwrap();
        assert_eq!(fault.kind, FaultKind::Handler);
        assert!(fault.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_factory_creates_instance_per_call() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Counter;

        let service = ServiceBuilder::factory("Counter", || {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Counter
        })
        .method("Ping", |_svc, (): ()| async move { Ok::<_, String>(1u8) })
        .build();

        let registry = ServiceRegistry::new();
        registry.add_local(service);
        registry.dispatch(request("Counter", "Ping", ())).await;
        registry.dispatch(request("Counter", "Ping", ())).await;

        assert_eq!(CREATED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remote_scope_is_independent() {
        let registry = ServiceRegistry::new();
        registry.register_remote("Echo");
        assert!(registry.is_remote("Echo"));
        assert!(!registry.has_local("Echo"));

        assert!(registry.unregister_remote("Echo"));
        assert!(!registry.is_remote("Echo"));
        assert!(!registry.unregister_remote("Echo"));
    }
}
