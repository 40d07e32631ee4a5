//! Integration tests for the server actor.
//!
//! Each test starts a real [`Server`] on an OS-assigned loopback port and
//! talks to it over raw connections, or with real clients for the
//! end-to-end runs.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use heartbeat::client;
use heartbeat::config::{ClientConfig, DelayRange, ServerConfig};
use heartbeat::correlator::{RequestState, TIMEOUT_MARKER};
use heartbeat::message::Message;
use heartbeat::server::{Server, ServerHandle};
use heartbeat::simulator::SimulatorConfig;
use heartbeat::transport::{self, LineReader, LineWriter};

const STEP: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn server_config(simulator: SimulatorConfig, keepalive_interval: Duration) -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1:0".to_string(),
        keepalive_interval,
        simulator,
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> ServerHandle {
    Server::bind(config)
        .await
        .expect("bind server")
        .start()
        .expect("start server")
}

async fn raw_client(addr: SocketAddr) -> (LineReader, LineWriter) {
    let stream = TcpStream::connect(addr).await.expect("connect");
    transport::split(stream).unwrap()
}

async fn next_message(reader: &mut LineReader) -> Message {
    let line = tokio::time::timeout(STEP, reader.next_line())
        .await
        .expect("timed out waiting for the server")
        .expect("read")
        .expect("server closed the connection");
    Message::parse(&line).unwrap_or_else(|e| panic!("server sent {line:?}: {e}"))
}

/// Skip keepalives and return the next response.
async fn next_pong(reader: &mut LineReader) -> (u64, u64, u64) {
    loop {
        match next_message(reader).await {
            Message::Pong {
                response_id,
                request_id,
                client_id,
            } => return (response_id, request_id, client_id),
            Message::Keepalive { .. } => continue,
            other => panic!("server sent {other:?}"),
        }
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    tokio::time::timeout(STEP, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

const HOUR: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_is_answered_with_session_client_id() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let (mut reader, writer) = raw_client(server.local_addr()).await;

    writer.send_line("[1] PING").await.unwrap();
    let (_, request_id, client_id) = next_pong(&mut reader).await;
    assert_eq!((request_id, client_id), (1, 1));

    writer.send_line("[2] PING").await.unwrap();
    assert_eq!(next_pong(&mut reader).await.1, 2);
    server.stop().await;
}

#[tokio::test]
async fn keepalive_is_sent_on_connect_and_periodically() {
    let server = start(server_config(
        SimulatorConfig::transparent(),
        Duration::from_millis(20),
    ))
    .await;
    let (mut reader, _writer) = raw_client(server.local_addr()).await;

    let mut last = 0;
    for _ in 0..3 {
        match next_message(&mut reader).await {
            Message::Keepalive { response_id } => {
                assert!(response_id > last);
                last = response_id;
            }
            other => panic!("expected keepalive, got {other:?}"),
        }
    }
    server.stop().await;
}

#[tokio::test]
async fn unexpected_message_gets_no_reply() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let (mut reader, writer) = raw_client(server.local_addr()).await;

    for junk in ["hello", "[3] keepalive", "[1:2] PONG (3)", "[04] PING"] {
        writer.send_line(junk).await.unwrap();
    }
    writer.send_line("[5] PING").await.unwrap();

    assert_eq!(next_pong(&mut reader).await.1, 5);
    server.stop().await;
}

#[tokio::test]
async fn unreadable_lines_do_not_end_the_session() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    let mut bytes = b"\xff\xfe\n".to_vec();
    bytes.extend(std::iter::repeat(b'1').take(transport::MAX_LINE_LEN * 2));
    bytes.extend_from_slice(b"\n[1] PING\n");
    stream.write_all(&bytes).await.unwrap();

    let (mut reader, _writer) = transport::split(stream).unwrap();
    assert_eq!(next_pong(&mut reader).await.1, 1);
    assert_eq!(server.context().session_count(), 1);
    server.stop().await;
}

#[tokio::test]
async fn throttled_requests_are_never_answered() {
    let simulator = SimulatorConfig {
        drop_rate: 1.0,
        ..SimulatorConfig::transparent()
    };
    let server = start(server_config(simulator, Duration::from_millis(10))).await;
    let (mut reader, writer) = raw_client(server.local_addr()).await;

    for id in 1..=10 {
        writer.send_line(&format!("[{id}] PING")).await.unwrap();
    }
    // Plenty of keepalives arrive meanwhile; none of them is a response.
    for _ in 0..15 {
        assert!(matches!(
            next_message(&mut reader).await,
            Message::Keepalive { .. }
        ));
    }
    server.stop().await;
}

#[tokio::test]
async fn response_delay_is_applied() {
    let simulator = SimulatorConfig {
        drop_rate: 0.0,
        response_delay: DelayRange::fixed(Duration::from_millis(150)),
        seed: Some(5),
    };
    let server = start(server_config(simulator, HOUR)).await;
    let (mut reader, writer) = raw_client(server.local_addr()).await;

    let sent = tokio::time::Instant::now();
    writer.send_line("[1] PING").await.unwrap();
    next_pong(&mut reader).await;
    assert!(sent.elapsed() >= Duration::from_millis(150));
    server.stop().await;
}

#[tokio::test]
async fn response_ids_are_unique_across_concurrent_sessions() {
    const SESSIONS: usize = 4;
    const REQUESTS: u64 = 50;

    let server = start(server_config(
        SimulatorConfig::transparent(),
        Duration::from_millis(5),
    ))
    .await;
    let addr = server.local_addr();

    let mut workers = Vec::new();
    for _ in 0..SESSIONS {
        workers.push(tokio::spawn(async move {
            let (mut reader, writer) = raw_client(addr).await;
            for id in 1..=REQUESTS {
                writer.send_line(&format!("[{id}] PING")).await.unwrap();
            }

            let mut ids = Vec::new();
            let mut pong_ids = Vec::new();
            let mut client_id = None;
            while (pong_ids.len() as u64) < REQUESTS {
                match next_message(&mut reader).await {
                    Message::Keepalive { response_id } => ids.push(response_id),
                    Message::Pong {
                        response_id,
                        client_id: cid,
                        ..
                    } => {
                        ids.push(response_id);
                        pong_ids.push(response_id);
                        assert_eq!(*client_id.get_or_insert(cid), cid);
                    }
                    other => panic!("server sent {other:?}"),
                }
            }
            // One session answers its requests in order.
            assert!(pong_ids.windows(2).all(|w| w[0] < w[1]));
            (client_id.unwrap(), ids)
        }));
    }

    let mut client_ids = HashSet::new();
    let mut seen = HashSet::new();
    for worker in workers {
        let (client_id, ids) = worker.await.unwrap();
        assert!(client_ids.insert(client_id), "client id {client_id} reused");
        for id in ids {
            assert!(seen.insert(id), "response id {id} issued twice");
        }
    }
    let expected: HashSet<u64> = (1..=SESSIONS as u64).collect();
    assert_eq!(client_ids, expected);
    server.stop().await;
}

#[tokio::test]
async fn registry_tracks_live_sessions() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let ctx = server.context().clone();

    let first = raw_client(server.local_addr()).await;
    let (mut second_reader, _second_writer) = raw_client(server.local_addr()).await;
    wait_for("two sessions", || ctx.session_count() == 2).await;
    assert_eq!(ctx.client_ids(), vec![1, 2]);

    drop(first);
    wait_for("one session", || ctx.session_count() == 1).await;

    server.stop().await;
    assert!(server.is_stopped());
    assert_eq!(ctx.session_count(), 0);

    // The surviving connection sees the server go away.
    let eof = tokio::time::timeout(STEP, async {
        loop {
            match second_reader.next_line().await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    })
    .await;
    assert!(eof.is_ok(), "connection stayed open after stop");
}

#[tokio::test]
async fn stop_during_connection_storm_leaves_registry_empty() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let addr = server.local_addr();
    let ctx = server.context().clone();

    let storm = tokio::spawn(async move {
        let mut streams = Vec::new();
        for _ in 0..200 {
            match TcpStream::connect(addr).await {
                Ok(stream) => streams.push(stream),
                Err(_) => break,
            }
        }
        streams
    });
    wait_for("first sessions", || ctx.session_count() > 0).await;

    server.stop().await;
    assert_eq!(ctx.session_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.session_count(), 0);
    drop(storm.await.unwrap());
}

/// Real client against real server over a lossy link.
#[tokio::test]
async fn client_resolves_every_request_in_order_over_lossy_link() {
    let simulator = SimulatorConfig {
        drop_rate: 0.3,
        response_delay: DelayRange::from_millis(1, 5),
        seed: Some(17),
    };
    let server = start(server_config(simulator, Duration::from_millis(15))).await;

    let cfg = ClientConfig {
        addr: server.local_addr().to_string(),
        name: "e2e".to_string(),
        request_interval: DelayRange::fixed(Duration::from_millis(10)),
        seed: Some(3),
        ..ClientConfig::default()
    };
    let mut handle = client::connect(&cfg).await.expect("client connect");

    let mut expected_id = 1;
    while expected_id <= 40 {
        let request = tokio::time::timeout(STEP, handle.next_resolution())
            .await
            .expect("no resolution in time")
            .expect("client stopped");
        assert_eq!(request.id, expected_id, "resolutions out of order");
        let text = request.result_text.as_deref().unwrap();
        match request.state {
            RequestState::Matched => match Message::parse(text) {
                Ok(Message::Pong {
                    request_id,
                    client_id,
                    ..
                }) => {
                    assert_eq!(request_id, request.id);
                    assert_eq!(client_id, 1);
                }
                other => panic!("matched with {other:?}"),
            },
            RequestState::TimedOut => assert_eq!(text, TIMEOUT_MARKER),
            RequestState::Open => panic!("open request resolved"),
        }
        expected_id += 1;
    }

    let stats = handle.stats();
    assert!(stats.matched > 0);
    assert!(stats.timed_out > 0, "30% drop rate produced no timeouts");

    handle.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn run_for_stops_server_at_alive_time() {
    let server = start(server_config(SimulatorConfig::transparent(), HOUR)).await;
    let (mut reader, _writer) = raw_client(server.local_addr()).await;

    tokio::time::timeout(STEP, server.run_for(Duration::from_millis(50)))
        .await
        .expect("server outlived its alive time");
    assert!(server.is_stopped());

    let closed = tokio::time::timeout(STEP, async {
        while let Ok(Some(_)) = reader.next_line().await {}
    })
    .await;
    assert!(closed.is_ok());
}
