//! Integration tests for duplexwire connections.
//!
//! These run real clients and servers over loopback TCP and Unix sockets.

use std::sync::Arc;
use std::time::Duration;

use duplexwire::codec::MsgPackCodec;
use duplexwire::config::{ClientConfig, FramingConfig, ServerConfig};
use duplexwire::connection::{ConnectionEvent, ConnectionStatus, StreamClient, StreamServer};
use duplexwire::protocol::{FrameBuffer, LengthPrefixSplitter, PacketSplitter};
use duplexwire::rpc::{encode_frame, InvocationRequest, IntoArgs, RpcHeader, RpcKind};
use duplexwire::transport::TcpAcceptor;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(2);

async fn start_server(config: ServerConfig) -> (StreamServer, String) {
    let server = StreamServer::new(config).unwrap();
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().to_string();
    server.start_with(Box::new(acceptor)).unwrap();
    (server, addr)
}

async fn connect(addr: &str, config: ClientConfig) -> StreamClient {
    let client = StreamClient::new(config).unwrap();
    assert!(client.connect(addr, WAIT).await.unwrap());
    client
}

async fn next_message(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Vec<u8> {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(ConnectionEvent::Message(frame)) = rx.recv().await {
                return frame.payload().to_vec();
            }
        }
    })
    .await
    .expect("no message within deadline")
}

async fn next_status(rx: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionStatus {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(ConnectionEvent::Status { status, .. }) = rx.recv().await {
                return status;
            }
        }
    })
    .await
    .expect("no status within deadline")
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within deadline");
}

/// An RPC request frame survives byte-by-byte delivery through the splitter.
#[test]
fn test_rpc_frame_through_frame_buffer() {
    let request = InvocationRequest {
        interface: "Echo".to_string(),
        method: "Call".to_string(),
        args: ("hello",).into_args().unwrap(),
    };
    let body = encode_frame(&RpcHeader::new(RpcKind::Request, 77), &request).unwrap();

    let splitter: Arc<dyn PacketSplitter> = Arc::new(LengthPrefixSplitter::new());
    let mut scratch = bytes::BytesMut::new();
    let wire = splitter.make_packet(&body, &mut scratch).to_vec();

    let mut buffer = FrameBuffer::new(1, splitter);
    let mut frames = Vec::new();
    for byte in &wire {
        frames.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
    }
    assert_eq!(frames.len(), 1);
    assert!(buffer.is_empty());

    let (header, offset) = RpcHeader::decode(frames[0].payload(), false).unwrap();
    assert_eq!(header.call_id, 77);
    let decoded: InvocationRequest = MsgPackCodec::decode(&frames[0].payload()[offset..]).unwrap();
    assert_eq!(decoded, request);
}

#[tokio::test]
async fn test_messages_both_directions_over_tcp() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let mut server_events = server.events().subscribe();
    let client = connect(&addr, ClientConfig::default()).await;
    let mut client_events = client.events().subscribe();

    client.send(b"to server").await.unwrap();
    assert_eq!(next_message(&mut server_events).await, b"to server");

    eventually(|| server.client_count() == 1).await;
    let id = server.client_ids()[0];
    server.send_to(id, b"to client").await.unwrap();
    assert_eq!(next_message(&mut client_events).await, b"to client");

    assert_eq!(server.broadcast(b"everyone").await, 1);
    assert_eq!(next_message(&mut client_events).await, b"everyone");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_text_helpers() {
    let (server, addr) = start_server(ServerConfig::default().enable_group(true)).await;
    let mut server_events = server.events().subscribe();
    let client = connect(&addr, ClientConfig::default()).await;
    let mut client_events = client.events().subscribe();

    client.send_text("héllo").await.unwrap();
    assert_eq!(next_message(&mut server_events).await, "héllo".as_bytes());

    eventually(|| server.client_count() == 1).await;
    let id = server.client_ids()[0];
    server.send_text_to(id, "direct").await.unwrap();
    assert_eq!(next_message(&mut client_events).await, b"direct");
    assert_eq!(server.broadcast_text("all").await, 1);
    assert_eq!(next_message(&mut client_events).await, b"all");

    client.join_group(&["lobby"]).await.unwrap();
    eventually(|| server.group_clients("lobby").len() == 1).await;
    assert_eq!(server.send_group_text(&["lobby"], "to lobby").await.unwrap(), 1);
    assert_eq!(next_message(&mut client_events).await, b"to lobby");
    client.send_group_text(&["lobby"], "echo", true).await.unwrap();
    assert_eq!(next_message(&mut client_events).await, b"echo");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_end_mark_framing_over_tcp() {
    let framing = FramingConfig::EndMark {
        end_mark: "\r\n".to_string(),
        include_end_mark: false,
        use_make_packet: true,
    };
    let (server, addr) = start_server(ServerConfig::default().framing(framing.clone())).await;
    let mut server_events = server.events().subscribe();
    let client = connect(&addr, ClientConfig::default().framing(framing)).await;

    for line in ["first", "second", "third"] {
        client.send(line.as_bytes()).await.unwrap();
    }
    assert_eq!(next_message(&mut server_events).await, b"first");
    assert_eq!(next_message(&mut server_events).await, b"second");
    assert_eq!(next_message(&mut server_events).await, b"third");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_server_drops_client() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let config = ClientConfig::default()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(50));

    let client = StreamClient::new(config).unwrap();
    let mut events = client.events().subscribe();
    assert!(client.connect(&addr, WAIT).await.unwrap());
    let client_id = client.id();

    eventually(|| server.client_count() == 1).await;
    let first = server.client_ids()[0];
    server.close_client(first).await.unwrap();

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    assert_eq!(client.status(), ConnectionStatus::Connected);
    assert_eq!(client.id(), client_id);

    // The server sees a brand new connection id.
    eventually(|| server.client_count() == 1 && server.client_ids()[0] != first).await;
    client.send(b"back").await.unwrap();

    client.close().await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Closed);
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_server_outage() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let config = ClientConfig::default()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(50));

    let client = StreamClient::new(config).unwrap();
    let mut events = client.events().subscribe();
    assert!(client.connect(&addr, WAIT).await.unwrap());
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

    server.stop().await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);

    // Several refused attempts: still reconnecting, nothing else reported.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.status(), ConnectionStatus::Connecting);
    assert!(client.is_running());
    assert!(events.try_recv().is_err());

    let revived = StreamServer::new(ServerConfig::default()).unwrap();
    let mut revived_events = revived.events().subscribe();
    tokio::time::timeout(WAIT, async {
        while revived.start(&addr).await.is_err() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("port not free again");

    assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);
    client.send(b"back online").await.unwrap();
    assert_eq!(next_message(&mut revived_events).await, b"back online");

    client.close().await;
    assert_eq!(next_status(&mut events).await, ConnectionStatus::Closed);
    revived.stop().await;
}

#[tokio::test]
async fn test_close_interrupts_reconnect_wait() {
    let (server, addr) = start_server(ServerConfig::default()).await;
    let config = ClientConfig::default()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_secs(3600));
    let client = connect(&addr, config).await;

    server.stop().await;
    eventually(|| client.status() == ConnectionStatus::Connecting).await;

    tokio::time::timeout(Duration::from_millis(500), client.close())
        .await
        .expect("close blocked on backoff");
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_group_isolation() {
    let (server, addr) = start_server(ServerConfig::default().enable_group(true)).await;

    let red_a = connect(&addr, ClientConfig::default()).await;
    let red_b = connect(&addr, ClientConfig::default()).await;
    let blue = connect(&addr, ClientConfig::default()).await;
    let mut red_a_rx = red_a.events().subscribe();
    let mut red_b_rx = red_b.events().subscribe();
    let mut blue_rx = blue.events().subscribe();

    red_a.join_group(&["red"]).await.unwrap();
    red_b.join_group(&["red"]).await.unwrap();
    blue.join_group(&["blue"]).await.unwrap();
    eventually(|| server.group_clients("red").len() == 2 && server.group_clients("blue").len() == 1).await;

    red_a.send_group(&["red"], b"red only", false).await.unwrap();
    assert_eq!(next_message(&mut red_b_rx).await, b"red only");

    red_a.send_group(&["red"], b"with echo", true).await.unwrap();
    assert_eq!(next_message(&mut red_a_rx).await, b"with echo");
    assert_eq!(next_message(&mut red_b_rx).await, b"with echo");

    // Not a member of blue: dropped without cross-group permission.
    red_a.send_group(&["blue"], b"intrusion", false).await.unwrap();
    blue.send_group(&["blue"], b"blue note", true).await.unwrap();
    assert_eq!(next_message(&mut blue_rx).await, b"blue note");

    assert_eq!(server.send_group(&["blue"], b"from server").await.unwrap(), 1);
    assert_eq!(next_message(&mut blue_rx).await, b"from server");

    for client in [&red_a, &red_b, &blue] {
        client.close().await;
    }
    eventually(|| server.group_clients("red").is_empty()).await;
    server.stop().await;
}

#[tokio::test]
async fn test_cross_group_message_when_allowed() {
    let config = ServerConfig::default()
        .enable_group(true)
        .allow_cross_group_message(true);
    let (server, addr) = start_server(config).await;

    let outsider = connect(&addr, ClientConfig::default()).await;
    let member = connect(&addr, ClientConfig::default()).await;
    let mut member_rx = member.events().subscribe();

    member.join_group(&["ops"]).await.unwrap();
    eventually(|| server.group_clients("ops").len() == 1).await;

    outsider.send_group(&["ops"], b"page", false).await.unwrap();
    assert_eq!(next_message(&mut member_rx).await, b"page");

    outsider.close().await;
    member.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_groups_rejoined_after_reconnect() {
    let (server, addr) = start_server(ServerConfig::default().enable_group(true)).await;
    let config = ClientConfig::default()
        .auto_reconnect(true)
        .reconnect_interval(Duration::from_millis(50));
    let client = connect(&addr, config).await;

    client.join_group(&["news"]).await.unwrap();
    eventually(|| server.group_clients("news").len() == 1).await;
    let first = server.group_clients("news")[0];

    server.close_client(first).await.unwrap();
    eventually(|| {
        let members = server.group_clients("news");
        members.len() == 1 && members[0] != first
    })
    .await;
    assert_eq!(client.groups(), vec!["news".to_string()]);

    client.close().await;
    server.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_pipe_transport() {
    let dir = tempfile::tempdir().unwrap();
    let target = format!("pipe://{}", dir.path().join("wire.sock").display());

    let server = StreamServer::new(ServerConfig::default()).unwrap();
    server.start(&target).await.unwrap();
    let mut server_events = server.events().subscribe();

    let client = StreamClient::new(ClientConfig::default()).unwrap();
    assert!(client.connect(&target, WAIT).await.unwrap());
    client.send(b"over a pipe").await.unwrap();
    assert_eq!(next_message(&mut server_events).await, b"over a pipe");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_connect_to_nothing_fails_fast() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().to_string();
    drop(acceptor);

    let client = StreamClient::new(ClientConfig::default()).unwrap();
    assert!(!client.connect(&addr, WAIT).await.unwrap());
    assert_eq!(client.status(), ConnectionStatus::Closed);
}
