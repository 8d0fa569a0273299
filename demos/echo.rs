//! Echo server and client in one process.
//!
//! Demonstrates:
//! - Registering a local service with typed arguments
//! - Calling it through a hand-written typed proxy
//! - Fault propagation for a handler error
//!
//! ```text
//! RUST_LOG=duplexwire=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use duplexwire::rpc::{CallProxy, RemoteService, ServiceBuilder};
use duplexwire::{ClientConfig, RpcClient, RpcServer, ServerConfig};
use tracing_subscriber::EnvFilter;

struct Echo;

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
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = RpcServer::new(ServerConfig::default())?;
    server.add_local_service(
        ServiceBuilder::instance("Echo", Arc::new(Echo))
            .method("Call", |_svc, (text,): (String,)| async move {
                if text.is_empty() {
                    return Err("nothing to echo".to_string());
                }
                Ok(text)
            })
            .build(),
    );
    server.start("127.0.0.1:7420").await?;

    let client = RpcClient::new(ClientConfig::default())?;
    client.register_remote("Echo");
    if !client.connect("127.0.0.1:7420", Duration::from_secs(2)).await? {
        return Err("could not connect".into());
    }

    let echo: EchoClient = client.proxy_as()?;
    println!("echo: {}", echo.call("hello, wire").await?);

    match echo.call("").await {
        Ok(reply) => println!("unexpected reply: {}", reply),
        Err(e) => println!("fault: {}", e),
    }

    client.close().await;
    server.stop().await;
    Ok(())
}
