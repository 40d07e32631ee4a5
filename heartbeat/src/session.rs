//! Per-connection server actor.
//!
//! A session runs two loops over one connection:
//!
//! ```text
//!               ┌────────────── inbound loop ───────────────┐
//!  [id] PING ──▶│ parse ─▶ verdict ─┬─ Drop ─▶ (ignored)     │
//!               │                   └─ Respond(delay)       │
//!               │                        sleep ─▶ PONG ─────┼──▶ LineWriter ──▶ client
//!               └───────────────────────────────────────────┘        ▲
//!               ┌──────────── keepalive loop ───────────────┐        │
//!               │ every interval: [id] keepalive ───────────┼────────┘
//!               └───────────────────────────────────────────┘
//! ```
//!
//! The inbound loop handles requests one at a time, so a delayed response
//! holds back the next request of the same client, exactly like a busy
//! server would.  The keepalive loop never waits on inbound traffic.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::lifecycle::TaskGroup;
use crate::message::Message;
use crate::record::LogRecord;
use crate::server::ServerContext;
use crate::simulator::{Simulator, Verdict};
use crate::transport::{self, LineReader, LineWriter};

/// Shortest keepalive period accepted; `tokio::time::interval` rejects zero.
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to one running session, kept in the server's registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    client_id: u64,
    peer: SocketAddr,
    tasks: TaskGroup,
}

impl SessionHandle {
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_stopped(&self) -> bool {
        self.tasks.is_cancelled()
    }

    /// Cancel both loops and wait for them to end.
    pub async fn stop(&self) {
        self.tasks.cancel();
        self.tasks.join().await;
    }
}

/// Start a session for a freshly accepted connection.
///
/// Assigns the next client id, spawns both loops as a child of `parent` and
/// registers the session in `ctx`.
pub fn start(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    parent: &TaskGroup,
    config: &ServerConfig,
) -> io::Result<SessionHandle> {
    stream.set_nodelay(true)?;
    let (reader, writer) = transport::split(stream)?;
    let peer = reader.peer();
    let client_id = ctx.ids().next_client_id();
    let tasks = parent.child(format!("session-{client_id}"));

    let handle = SessionHandle {
        client_id,
        peer,
        tasks: tasks.clone(),
    };
    ctx.register(handle.clone());

    tasks.spawn(
        "inbound",
        inbound_loop(
            reader,
            writer.clone(),
            Simulator::new(config.simulator.clone(), client_id),
            client_id,
            Arc::clone(&ctx),
            tasks.clone(),
        ),
    );
    tasks.spawn(
        "keepalive",
        keepalive_loop(writer, config.keepalive_interval, client_id, ctx),
    );

    Ok(handle)
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn inbound_loop(
    mut reader: LineReader,
    writer: LineWriter,
    mut simulator: Simulator,
    client_id: u64,
    ctx: Arc<ServerContext>,
    tasks: TaskGroup,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::info!("[session {client_id}] {} closed the connection", reader.peer());
                break;
            }
            Err(e) => {
                log::warn!("[session {client_id}] read from {} failed: {e}", reader.peer());
                break;
            }
        };
        let request_at = Utc::now();

        let request_id = match Message::parse(&line) {
            Ok(Message::Ping { request_id }) => request_id,
            _ => {
                log::warn!("[session {client_id}] unexpected message from client: {line:?}");
                continue;
            }
        };

        match simulator.verdict() {
            Verdict::Drop => {
                log::debug!("[session {client_id}] throttled request {request_id}");
                LogRecord::ignored(request_at, line).log();
            }
            Verdict::Respond(delay) => {
                tokio::time::sleep(delay).await;
                let response = Message::Pong {
                    response_id: ctx.ids().next_response_id(),
                    request_id,
                    client_id,
                }
                .to_string();
                let response_at = Utc::now();
                if let Err(e) = writer.send_line(&response).await {
                    log::warn!("[session {client_id}] write to {} failed: {e}", writer.peer());
                    break;
                }
                LogRecord::new(request_at, line, response_at, response).log();
            }
        }
    }

    // Connection is gone: retire the keepalive loop too.
    ctx.unregister(client_id);
    tasks.cancel();
}

async fn keepalive_loop(
    writer: LineWriter,
    interval: Duration,
    client_id: u64,
    ctx: Arc<ServerContext>,
) {
    let mut ticker = tokio::time::interval(interval.max(MIN_KEEPALIVE_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let keepalive = Message::Keepalive {
            response_id: ctx.ids().next_response_id(),
        }
        .to_string();
        if let Err(e) = writer.send_line(&keepalive).await {
            log::warn!("[session {client_id}] keepalive to {} failed: {e}", writer.peer());
            break;
        }
        log::trace!("[session {client_id}] → {keepalive}");
    }
}
