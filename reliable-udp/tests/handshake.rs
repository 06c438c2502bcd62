//! Integration tests for the 3-way handshake.
//!
//! Liveness runs over real `tokio::net::UdpSocket`s on loopback, with the
//! responder in a background task.  Retry-budget tests use the in-memory
//! [`Link`] with paused time so the 4 s timeouts are exact.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use reliable_udp::{
    connection::Connection,
    endpoint,
    error::HandshakeError,
    events::{AttemptFailure, Event, EventSink, LogSink, Recorder},
    simulator::Link,
    socket::{Channel, Socket},
    state::ConnectionState,
    Config, Timeouts,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind_loopback() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket")
}

/// Handshake over loopback UDP; returns `(client, server)`.
async fn udp_session(client_cfg: Config, server_cfg: Config) -> (Connection<Socket>, Connection<Socket>) {
    let server_socket = bind_loopback().await;
    let server_addr = server_socket.local_addr();

    let server_task = tokio::spawn(async move {
        let mut rng = StdRng::seed_from_u64(1);
        Connection::accept(server_socket, server_cfg, Arc::new(LogSink), &mut rng).await
    });

    let client_socket = bind_loopback().await;
    let mut rng = StdRng::seed_from_u64(2);
    let client = tokio::time::timeout(
        Duration::from_secs(5),
        Connection::connect(client_socket, server_addr, client_cfg, Arc::new(LogSink), &mut rng),
    )
    .await
    .expect("client connect timed out")
    .expect("client connect failed");

    let server = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");
    (client, server)
}

fn failed_attempts(recorder: &Recorder, reason: AttemptFailure) -> usize {
    recorder.count(|e| matches!(e, Event::HandshakeAttemptFailed { reason: r, .. } if *r == reason))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides reach `Established` and agree on the responder's window.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let server_cfg = Config {
        window_size: 5,
        ..Config::default()
    };
    let (client, server) = udp_session(Config::default(), server_cfg).await;

    assert_eq!(client.state(), ConnectionState::Established);
    assert_eq!(server.state(), ConnectionState::Established);
    assert_eq!(client.window_size(), 5);
    assert_eq!(server.window_size(), 5);
}

/// Each side's next sequence number is what the other expects to receive.
#[tokio::test]
async fn handshake_sequence_numbers_agree() {
    let (client, server) = udp_session(Config::default(), Config::default()).await;

    assert_eq!(client.local_seq(), server.peer_next_seq());
    assert_eq!(server.local_seq(), client.peer_next_seq());
    assert_eq!(server.peer_addr(), client.local_addr());
    assert_eq!(client.peer_addr(), server.local_addr());
}

/// With nobody answering, `connect` fails after exactly three 4 s timeouts.
#[tokio::test(start_paused = true)]
async fn handshake_fails_after_three_timeouts() {
    let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    // `_silent` stays alive so the link does not look closed.
    let (client, _silent) = Link::pair(a, b);
    let recorder = Recorder::new();
    let sink: Arc<dyn EventSink> = Arc::new(recorder.clone());

    let started = tokio::time::Instant::now();
    let mut rng = StdRng::seed_from_u64(3);
    let err = Connection::connect(client, b, Config::default(), sink, &mut rng)
        .await
        .err()
        .expect("connect must fail");

    assert!(matches!(err, HandshakeError::ConnectionFailed { attempts: 3 }));
    assert_eq!(failed_attempts(&recorder, AttemptFailure::Timeout), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(12), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(12_100), "{elapsed:?}");

    use ConnectionState::*;
    assert_eq!(
        recorder.states(),
        vec![SynSent, Closed, SynSent, Closed, SynSent, Closed]
    );
}

/// Every attempt uses a fresh initial sequence number.
#[tokio::test(start_paused = true)]
async fn each_attempt_draws_a_new_isn() {
    let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let (client, server) = Link::pair(a, b);

    let task = tokio::spawn(async move {
        let mut rng = StdRng::seed_from_u64(4);
        Connection::connect(client, b, Config::default(), Arc::new(LogSink), &mut rng).await
    });

    let mut isns = Vec::new();
    for _ in 0..3 {
        let (bytes, _) = server.recv_from(None).await.unwrap().unwrap();
        isns.push(reliable_udp::segment::Segment::decode(&bytes).unwrap().seq);
    }
    assert!(task.await.unwrap().is_err());
    isns.sort_unstable();
    isns.dedup();
    assert_eq!(isns.len(), 3);
}

/// A reply that cannot be decoded uses up an attempt, like a timeout.
#[tokio::test(start_paused = true)]
async fn undecodable_reply_counts_against_budget() {
    let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
    let b: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let (client, server) = Link::pair(a, b);
    let recorder = Recorder::new();
    let sink: Arc<dyn EventSink> = Arc::new(recorder.clone());

    let task = tokio::spawn(async move {
        let mut rng = StdRng::seed_from_u64(5);
        Connection::connect(client, b, Config::default(), sink, &mut rng).await
    });

    for _ in 0..3 {
        let _syn = server.recv_from(None).await.unwrap().unwrap();
        server.send_to(b"garbage", a).await.unwrap();
    }
    let err = task.await.unwrap().err().unwrap();
    assert!(matches!(err, HandshakeError::ConnectionFailed { attempts: 3 }));
    assert_eq!(failed_attempts(&recorder, AttemptFailure::Undecodable), 3);
}

/// Over real UDP an unanswered SYN fails too, with a short timeout.
#[tokio::test]
async fn handshake_fails_against_silent_udp_peer() {
    let silent = bind_loopback().await;
    let client = bind_loopback().await;
    let config = Config {
        timeouts: Timeouts {
            handshake: Duration::from_millis(100),
            ..Timeouts::default()
        },
        ..Config::default()
    };

    let mut rng = StdRng::seed_from_u64(6);
    let err = Connection::connect(client, silent.local_addr(), config, Arc::new(LogSink), &mut rng)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HandshakeError::ConnectionFailed { attempts: 3 }));
}

/// `endpoint::connect` / `accept` take textual hosts and ports.
#[tokio::test]
async fn endpoint_functions_resolve_and_connect() {
    let spare = bind_loopback().await;
    let port = spare.local_addr().port();
    drop(spare);

    let server = tokio::spawn(endpoint::accept("127.0.0.1", port, Config::default()));
    let client = tokio::time::timeout(
        Duration::from_secs(10),
        endpoint::connect("127.0.0.1", 0, "127.0.0.1", port, Config::default()),
    )
    .await
    .expect("connect timed out");

    let server = server.await.unwrap().unwrap();
    let client = client.unwrap();
    assert_eq!(server.peer_addr().port(), client.local_addr().port());
}
