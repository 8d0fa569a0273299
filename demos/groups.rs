//! Group messaging.
//!
//! Three clients join two groups; one of them talks to its group and the
//! server addresses the other group directly.
//!
//! ```text
//! cargo run --example groups
//! ```

use std::time::Duration;

use duplexwire::{ClientConfig, ServerConfig, StreamClient, StreamServer};

async fn member(addr: &str, name: &'static str, group: &str) -> duplexwire::Result<StreamClient> {
    let client = StreamClient::new(ClientConfig::default().auto_reconnect(true))?;
    client.events().on_message(move |frame| {
        println!("{} got: {}", name, String::from_utf8_lossy(frame.payload()));
    });
    client.connect(addr, Duration::from_secs(2)).await?;
    client.join_group(&[group]).await?;
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = StreamServer::new(ServerConfig::default().enable_group(true))?;
    server.start("127.0.0.1:7421").await?;

    let alice = member("127.0.0.1:7421", "alice", "red").await?;
    let bob = member("127.0.0.1:7421", "bob", "red").await?;
    let carol = member("127.0.0.1:7421", "carol", "blue").await?;

    // Joins are processed by the server's reader tasks.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.send_group(&["red"], b"hello red", true).await?;
    let delivered = server.send_group(&["blue"], b"hello blue").await?;
    println!("server reached {} blue member(s)", delivered);

    tokio::time::sleep(Duration::from_millis(100)).await;

    for client in [alice, bob, carol] {
        client.close().await;
    }
    server.stop().await;
    Ok(())
}
