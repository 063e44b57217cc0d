//! Real-socket integration tests for the concrete scenarios in §8.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use relay_client::RelayClient;
use relay_core::wire::{self, Header};
use relay_core::RelayConfig;
use relay_server::Runtime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn spawn_server(ping_interval_ms: u64) -> SocketAddr {
    let mut config = RelayConfig::default();
    config.bind_addr = "127.0.0.1:0".into();
    config.ping_interval_ms = ping_interval_ms;
    let runtime = Runtime::bind(config).await.expect("bind");
    let addr = runtime.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = runtime.run().await;
    });
    addr
}

async fn send_connect(stream: &mut TcpStream) -> Result<()> {
    let mut w = wire::FrameWriter::new();
    w.write_u8(wire::request::CONNECT);
    w.write_str_remainder(relay_core::config::PROTOCOL_VERSION);
    let framed = wire::encode_stream_frame(Header::new(wire::msg_type::RESPONSE, 0), false, &w.finish());
    stream.write_all(&framed).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<(Header, Vec<u8>)> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let (_blasted, len) = wire::decode_stream_length_prefix(prefix);
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    let (header, payload) = wire::split_frame_body(&body).expect("non-empty frame body");
    Ok((header, payload.to_vec()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_handshake_assigns_id_and_welcome() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    let client = RelayClient::connect(addr).await?;
    assert_eq!(client.client_id, 0);
    assert!(client.welcome.contains("Relay"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_second_connect_triggers_disconnect() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    send_connect(&mut stream).await?;
    let (header, payload) = read_frame(&mut stream).await?;
    assert_eq!(header.msg_type, wire::msg_type::RESPONSE);
    assert_eq!(payload[1], 1); // success

    send_connect(&mut stream).await?;
    let result = timeout(Duration::from_secs(2), async {
        // Either a failure Response arrives, or the socket closes outright;
        // both are acceptable evidence of the Closing transition. Drain
        // until EOF either way.
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await
    })
    .await;
    assert!(result.is_ok(), "server never closed the connection after a duplicate Connect");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s2_name_collision_within_shared_channel_is_rejected() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    let mut a = RelayClient::connect(addr).await?;
    let mut b = RelayClient::connect(addr).await?;

    a.set_name("Foo").await?;
    b.set_name("Bar").await?;
    a.join_channel("room", false, false).await?;
    b.join_channel("room", false, false).await?;
    // the join-broadcast Peer notification for B's join arrives at A; drain it.
    let _ = a.recv_frame().await?;

    let err = b.set_name("foo").await.unwrap_err();
    assert!(err.to_string().contains("Name already taken"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s3_join_broadcast_ordering() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    let mut a = RelayClient::connect(addr).await?;
    let mut b = RelayClient::connect(addr).await?;

    a.set_name("A").await?;
    let created = a.join_channel("r", false, false).await?;
    assert!(created.is_master);
    assert!(created.members.is_empty());

    b.set_name("B").await?;
    let joined = b.join_channel("r", false, false).await?;
    assert!(!joined.is_master);
    assert_eq!(joined.members.len(), 1);
    assert_eq!(joined.members[0].1, true); // A is master
    assert_eq!(joined.members[0].2, "A");

    let notification = a.recv_frame().await?;
    assert_eq!(notification.header.msg_type, wire::msg_type::PEER_OR_UDP_HELLO);
    let mut r = wire::FrameReader::new(&notification.payload);
    let channel_id = r.read_u16();
    let member_id = r.read_u16();
    let is_master = r.read_u8();
    let name = r.read_str_remainder();
    assert_eq!(channel_id, created.channel_id);
    assert_eq!(member_id, b.client_id);
    assert_eq!(is_master, 0);
    assert_eq!(name, "B");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s4_auto_close_on_master_departure() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    let mut m = RelayClient::connect(addr).await?;
    let mut n = RelayClient::connect(addr).await?;

    m.set_name("M").await?;
    let created = m.join_channel("r", false, true).await?; // auto_close
    n.set_name("N").await?;
    n.join_channel("r", false, false).await?;
    let _ = m.recv_frame().await?; // M's Peer-join notification for N

    m.leave_channel(created.channel_id).await?;

    let closed = n.recv_frame().await?;
    assert_eq!(closed.header.msg_type, wire::msg_type::RESPONSE);
    let mut r = wire::FrameReader::new(&closed.payload);
    let sub = r.read_u8();
    let success = r.read_u8();
    let channel_id = r.read_u16();
    assert_eq!(sub, wire::request::LEAVE_CHANNEL);
    assert_eq!(success, 1);
    assert_eq!(channel_id, created.channel_id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s5_ping_timeout_disconnects_unresponsive_client() -> Result<()> {
    init_tracing();
    let addr = spawn_server(150).await;
    let mut client = RelayClient::connect(addr).await?;

    let ping = timeout(Duration::from_millis(500), client.recv_frame())
        .await
        .expect("timed out waiting for first Ping")?;
    assert_eq!(ping.header.msg_type, wire::msg_type::PING);

    // Never Ping back; the next sweep should disconnect us.
    let result = timeout(Duration::from_millis(500), client.recv_frame()).await;
    match result {
        Ok(Err(_)) => {}
        Ok(Ok(frame)) => panic!("expected disconnect, got frame type {}", frame.header.msg_type),
        Err(_) => panic!("server never disconnected the unresponsive client"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_udp_welcome_sent_exactly_once() -> Result<()> {
    init_tracing();
    let addr = spawn_server(5000).await;
    // RelayClient::connect() already runs UDPHello/await-UDPWelcome. A
    // second UDPHello from the same client must not produce another
    // UDPWelcome: resending it and then checking for silence over the next
    // window is how we observe that on the wire.
    let mut client = RelayClient::connect(addr).await?;

    let framed = wire::encode_datagram_inbound(
        Header::new(wire::msg_type::PEER_OR_UDP_HELLO, 0),
        client.client_id,
        &[],
    );
    let local_udp = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    local_udp.connect(addr).await?;
    local_udp.send(&framed).await?;

    let next = timeout(Duration::from_millis(300), client.recv_frame()).await;
    assert!(next.is_err(), "a redundant UDPHello produced a second UDPWelcome");
    Ok(())
}
