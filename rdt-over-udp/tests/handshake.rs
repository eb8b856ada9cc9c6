//! Integration tests for the three-way handshake.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback, runs the
//! server half in a background task, and checks the state both sides end up
//! in.

use std::net::SocketAddr;
use std::time::Duration;

use rdt_over_udp::packet::flags;
use rdt_over_udp::{
    ConnError, Connection, ConnectionState, Packet, ScriptedLoss, TimerConfig,
};
use tokio::net::UdpSocket;
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn fast() -> TimerConfig {
    TimerConfig {
        rto: Duration::from_millis(50),
        retry_limit: 5,
        ..TimerConfig::default()
    }
}

async fn bind(config: TimerConfig) -> Connection {
    Connection::bind(Some(loopback()), config)
        .await
        .expect("bind connection")
}

/// Run `accept` on `server` in a background task and `connect` from
/// `client`; return both once the handshake finished.
async fn handshake(mut client: Connection, mut server: Connection) -> (Connection, Connection) {
    let server_addr = server.local_addr();
    let server_task = tokio::spawn(async move {
        server.accept().await.expect("server accept failed");
        server
    });

    timeout(Duration::from_secs(5), client.connect(server_addr))
        .await
        .expect("client connect timed out")
        .expect("client connect failed");

    let server = timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");
    (client, server)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides should reach `Established` after a clean handshake on loopback.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let (client, server) = handshake(bind(fast()).await, bind(fast()).await).await;

    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(server.state(), ConnectionState::Established);
    assert_eq!(client.peer(), Some(server.local_addr()));
    assert_eq!(server.peer(), Some(client.local_addr()));
}

/// Each side's `accepted` must equal the other side's `sent`.
#[tokio::test]
async fn handshake_counters_agree() {
    let (client, server) = handshake(bind(fast()).await, bind(fast()).await).await;

    assert_eq!(client.sent(), 1);
    assert_eq!(client.accepted(), 1);
    assert_eq!(server.accepted(), client.sent());
    assert_eq!(client.accepted(), server.sent());
}

/// Connecting to an address where nobody is listening should fail once the
/// retry budget is spent rather than hang forever.
#[tokio::test]
async fn connect_to_silent_peer_fails_with_peer_unresponsive() {
    // An ephemeral port whose socket is dropped immediately; nobody answers.
    let silent_addr = {
        let tmp = UdpSocket::bind(loopback()).await.unwrap();
        tmp.local_addr().unwrap()
    };

    let mut client = bind(fast()).await;
    let result = timeout(Duration::from_secs(5), client.connect(silent_addr))
        .await
        .expect("connect should give up on its own");

    assert!(
        matches!(result, Err(ConnError::PeerUnresponsive { attempts: 6 })),
        "expected PeerUnresponsive, got: {result:?}"
    );
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!((client.sent(), client.accepted()), (0, 0));
}

/// A lost SYN+ACK makes the client resend its SYN, which the server answers
/// with another SYN+ACK.
#[tokio::test]
async fn handshake_survives_lost_syn_ack() {
    let mut client = bind(fast()).await;
    client.set_fault_injector(Box::new(ScriptedLoss::drop_first(1)));

    let (client, server) = handshake(client, bind(fast()).await).await;
    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(server.state(), ConnectionState::Established);
    assert_eq!(server.accepted(), client.sent());
}

/// If the client's closing ACK is lost, the client's first data packet
/// completes the server's handshake and is still delivered.
#[tokio::test]
async fn handshake_completed_by_first_data_packet() {
    let mut server = bind(fast()).await;
    server.set_fault_injector(Box::new(ScriptedLoss::drop_first(1)));
    let server_addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        server.accept().await.expect("accept");
        let msg = server.receive().await.expect("receive");
        (server, msg)
    });

    let mut client = bind(fast()).await;
    client.connect(server_addr).await.expect("connect");
    timeout(Duration::from_secs(5), client.send(b"hi"))
        .await
        .expect("send timed out")
        .expect("send failed");

    let (server, msg) = timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.into_data().as_deref(), Some(&b"hi"[..]));
    assert_eq!(server.accepted(), 2);
    assert_eq!(client.sent(), 2);
}

/// The first packet a listener sees must be a SYN.
#[tokio::test]
async fn accept_rejects_non_syn_first_packet() {
    let mut server = bind(fast()).await;
    let server_addr = server.local_addr();
    let server_task = tokio::spawn(async move { server.accept().await });

    let raw = UdpSocket::bind(loopback()).await.unwrap();
    let bogus = Packet::data(1, 0, b"hello?".to_vec()).encode().unwrap();
    raw.send_to(&bogus, server_addr).await.unwrap();

    let result = timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(result, Err(ConnError::ProtocolViolation(_))),
        "got: {result:?}"
    );
}

/// A SYN+ACK that does not acknowledge our SYN is a protocol violation.
#[tokio::test]
async fn connect_rejects_wrong_syn_ack() {
    let raw = UdpSocket::bind(loopback()).await.unwrap();
    let raw_addr = raw.local_addr().unwrap();

    let mut client = bind(fast()).await;
    let client_task = tokio::spawn(async move { client.connect(raw_addr).await });

    let mut buf = [0u8; 1024];
    let (n, from) = raw.recv_from(&mut buf).await.unwrap();
    let syn = Packet::decode(&buf[..n]).unwrap();
    assert!(syn.is_syn());
    assert_eq!((syn.seq, syn.ack), (1, 0));

    let wrong = Packet::control(1, 7, flags::SYN | flags::ACK);
    raw.send_to(&wrong.encode().unwrap(), from).await.unwrap();

    let result = client_task.await.unwrap();
    assert!(
        matches!(result, Err(ConnError::ProtocolViolation(_))),
        "got: {result:?}"
    );
}

/// Data operations need an established connection.
#[tokio::test]
async fn operations_before_handshake_are_rejected() {
    let mut conn = bind(fast()).await;

    assert!(matches!(
        conn.send(b"early").await,
        Err(ConnError::NotConnected {
            state: ConnectionState::Idle
        })
    ));
    assert!(matches!(
        conn.send_batch(&["a", "b"]).await,
        Err(ConnError::NotConnected { .. })
    ));
    assert!(matches!(
        conn.receive().await,
        Err(ConnError::NotConnected { .. })
    ));
    assert!(matches!(
        conn.close().await,
        Err(ConnError::NotConnected { .. })
    ));
}

/// A second handshake on an open connection is refused.
#[tokio::test]
async fn connect_while_established_is_rejected() {
    let (mut client, server) = handshake(bind(fast()).await, bind(fast()).await).await;

    let result = client.connect(server.local_addr()).await;
    assert!(matches!(
        result,
        Err(ConnError::AlreadyConnected {
            state: ConnectionState::Established
        })
    ));
    assert_eq!(client.state(), ConnectionState::Established);
}
