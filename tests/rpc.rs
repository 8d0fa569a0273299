//! End-to-end RPC tests over loopback TCP.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use duplexwire::config::{ClientConfig, ServerConfig};
use duplexwire::connection::ConnectionEvent;
use duplexwire::rpc::{CallProxy, RemoteService, RpcClient, RpcServer, ServiceBuilder};
use duplexwire::transport::TcpAcceptor;
use duplexwire::WireError;

const WAIT: Duration = Duration::from_secs(2);

struct Echo {
    calls: AtomicUsize,
}

/// Typed client for the `Echo` interface.
struct EchoClient(CallProxy);

impl RemoteService for EchoClient {
    const INTERFACE: &'static str = "Echo";

    fn from_proxy(proxy: CallProxy) -> Self {
        EchoClient(proxy)
    }
}

impl EchoClient {
    async fn call(&self, text: &str) -> duplexwire::Result<String> {
        self.0.call("Call", (text,)).await
    }

    async fn delayed(&self, text: &str, millis: u64) -> duplexwire::Result<String> {
        self.0.call("Delayed", (text, millis)).await
    }
}

fn echo_service(state: Arc<Echo>) -> duplexwire::rpc::LocalService {
    ServiceBuilder::instance("Echo", state)
        .method("Call", |svc: Arc<Echo>, (text,): (String,)| async move {
            svc.calls.fetch_add(1, Ordering::SeqCst);
            if text.is_empty() {
                return Err("input must not be empty".to_string());
            }
            Ok(text)
        })
        .method("Delayed", |_svc: Arc<Echo>, (text, millis): (String, u64)| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, String>(text)
        })
        .build()
}

async fn echo_server(config: ServerConfig) -> (RpcServer, Arc<Echo>, String) {
    let state = Arc::new(Echo {
        calls: AtomicUsize::new(0),
    });
    let server = RpcServer::new(config).unwrap();
    server.add_local_service(echo_service(state.clone()));

    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().to_string();
    server.start_with(Box::new(acceptor)).unwrap();
    (server, state, addr)
}

async fn echo_client(addr: &str, config: ClientConfig) -> RpcClient {
    let client = RpcClient::new(config).unwrap();
    client.register_remote("Echo");
    assert!(client.connect(addr, WAIT).await.unwrap());
    client
}

#[tokio::test]
async fn test_echo_round_trip_within_deadline() {
    let (server, state, addr) = echo_server(ServerConfig::default()).await;

    let started = Instant::now();
    let client = echo_client(&addr, ClientConfig::default()).await;
    let echo: EchoClient = client.proxy_as().unwrap();
    assert_eq!(echo.call("hello").await.unwrap(), "hello");
    assert!(started.elapsed() < Duration::from_millis(2000));
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let client = echo_client(&addr, ClientConfig::default()).await;
    let echo: EchoClient = client.proxy_as().unwrap();

    let err = tokio::time::timeout(WAIT, echo.call(""))
        .await
        .expect("faulted call must not hang")
        .unwrap_err();
    match err {
        WireError::RemoteFault(message) => assert!(message.contains("input must not be empty")),
        other => panic!("unexpected error: {other}"),
    }

    // The connection is still usable afterwards.
    assert_eq!(echo.call("again").await.unwrap(), "again");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_missing_method_and_interface() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let client = echo_client(&addr, ClientConfig::default()).await;

    let echo = client.proxy("Echo").unwrap();
    let err = echo.call::<_, String>("Shout", ("x",)).await.unwrap_err();
    assert!(matches!(err, WireError::MethodNotFound { ref method, .. } if method == "Shout"));

    client.register_remote("Clock");
    let clock = client.proxy("Clock").unwrap();
    let err = clock.call::<_, u64>("Now", ()).await.unwrap_err();
    assert!(matches!(err, WireError::InterfaceNotRegistered(ref name) if name == "Clock"));

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let client = echo_client(&addr, ClientConfig::default()).await;
    let echo = Arc::new(client.proxy_as::<EchoClient>().unwrap());

    // Later calls finish first, so responses come back out of order.
    let calls = (0..64u64).map(|i| {
        let echo = echo.clone();
        tokio::spawn(async move {
            let text = format!("call-{}", i);
            let reply = echo.delayed(&text, 64 - i).await.unwrap();
            (text, reply)
        })
    });

    let mut seen = HashSet::new();
    for handle in futures::future::join_all(calls).await {
        let (sent, received) = handle.unwrap();
        assert_eq!(sent, received);
        assert!(seen.insert(received));
    }
    assert_eq!(seen.len(), 64);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_server_calls_back_into_client() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    server.register_remote("Echo");

    let client_state = Arc::new(Echo {
        calls: AtomicUsize::new(0),
    });
    let client = RpcClient::new(ClientConfig::default()).unwrap();
    client.add_local_service(echo_service(client_state.clone()));
    client.register_remote("Echo");
    assert!(client.connect(&addr, WAIT).await.unwrap());

    let proxy = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(proxy) = server.first_client_proxy("Echo") {
                return proxy;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Calls in both directions share the one connection.
    let client_echo = client.proxy("Echo").unwrap();
    let (down, up) = tokio::join!(
        proxy.call::<_, String>("Call", ("from server",)),
        client_echo.call::<_, String>("Call", ("from client",)),
    );
    assert_eq!(down.unwrap(), "from server");
    assert_eq!(up.unwrap(), "from client");
    assert_eq!(client_state.calls.load(Ordering::SeqCst), 1);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_pending_calls_fail_when_connection_drops() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let client = echo_client(&addr, ClientConfig::default().call_timeout(None)).await;
    let echo: EchoClient = client.proxy_as().unwrap();

    let stopper = {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            server.stop().await;
        })
    };

    let err = tokio::time::timeout(WAIT, echo.delayed("slow", 60_000))
        .await
        .expect("pending call left hanging")
        .unwrap_err();
    assert!(matches!(err, WireError::ConnectionClosed));
    stopper.await.unwrap();
}

#[tokio::test]
async fn test_call_timeout() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let config = ClientConfig::default().call_timeout(Some(Duration::from_millis(100)));
    let client = echo_client(&addr, config).await;
    let echo: EchoClient = client.proxy_as().unwrap();

    let err = echo.delayed("late", 1_000).await.unwrap_err();
    assert!(matches!(err, WireError::CallTimeout));
    assert_eq!(echo.call("on time").await.unwrap(), "on time");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_raw_messages_alongside_rpc() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let mut server_events = server.stream().events().subscribe();
    let client = echo_client(&addr, ClientConfig::default()).await;

    let echo: EchoClient = client.proxy_as().unwrap();
    assert_eq!(echo.call("rpc").await.unwrap(), "rpc");
    client.stream().send(b"plain").await.unwrap();

    let message = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(ConnectionEvent::Message(frame)) = server_events.recv().await {
                return frame;
            }
        }
    })
    .await
    .unwrap();
    // RPC traffic never surfaces as a message event.
    assert_eq!(message.payload(), b"plain");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_proxy_survives_reconnect() {
    let (server, _state, addr) = echo_server(ServerConfig::default()).await;
    let config = ClientConfig::default()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(50));
    let client = echo_client(&addr, config).await;
    let echo: EchoClient = client.proxy_as().unwrap();
    assert_eq!(echo.call("before").await.unwrap(), "before");

    let first = server.stream().client_ids()[0];
    server.stream().close_client(first).await.unwrap();

    let reply = tokio::time::timeout(WAIT, async {
        loop {
            match echo.call("after").await {
                Ok(reply) => return reply,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(reply, "after");

    client.close().await;
    server.stop().await;
}
