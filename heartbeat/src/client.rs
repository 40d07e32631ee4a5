//! Client actor: request emitter plus incoming-message dispatcher.
//!
//! ```text
//!   emitter ── enqueue ──▶ Correlator ◀── resolve ── dispatcher
//!      │                  (Arc<Mutex>)                    ▲
//!      ▼                                                  │
//!  LineWriter ── [id] PING ──▶ server ── PONG/keepalive ──┘ LineReader
//! ```
//!
//! The emitter enqueues each request before writing it, so the dispatcher
//! can never see a response whose request is not yet tracked.  The
//! correlator lock is only held for the synchronous enqueue/resolve calls,
//! never across an await.
//!
//! Losing the connection or detecting a protocol violation ends this actor's
//! loops only; the process keeps running.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::{ClientConfig, DelayRange};
use crate::correlator::{CorrelationError, Correlator, CorrelatorStats, Request};
use crate::error::{Error, Result};
use crate::lifecycle::{self, TaskGroup};
use crate::message::Message;
use crate::transport::{self, LineReader, LineWriter};

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// Handle to a connected, running client.
#[derive(Debug)]
pub struct ClientHandle {
    tasks: TaskGroup,
    correlator: Arc<Mutex<Correlator>>,
    resolutions: mpsc::UnboundedReceiver<Request>,
}

impl ClientHandle {
    pub fn name(&self) -> &str {
        self.tasks.name()
    }

    /// Next request resolved by the dispatcher, in resolution order.
    ///
    /// Returns `None` once the client has stopped and every buffered
    /// resolution has been consumed.
    pub async fn next_resolution(&mut self) -> Option<Request> {
        self.resolutions.recv().await
    }

    /// Stop buffering resolutions for [`next_resolution`](Self::next_resolution).
    pub fn discard_resolutions(&mut self) {
        self.resolutions.close();
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.correlator.lock().stats()
    }

    /// Ids of requests still awaiting a response, oldest first.
    pub fn outstanding_ids(&self) -> Vec<u64> {
        self.correlator.lock().outstanding_ids()
    }

    pub fn is_stopped(&self) -> bool {
        self.tasks.is_cancelled()
    }

    /// Resolves once the client stops, for whatever reason.
    pub async fn stopped(&self) {
        self.tasks.cancelled().await
    }

    /// Cancel both loops and wait for them to end.
    ///
    /// Outstanding requests are abandoned as they are; nothing is mutated
    /// after this returns.
    pub async fn stop(&self) {
        self.tasks.cancel();
        self.tasks.join().await;
    }

    /// Run until `alive_time` has elapsed (or the connection is lost), then stop.
    pub async fn run_for(&self, alive_time: Duration) {
        lifecycle::expire_after(&self.tasks, alive_time).await;
    }
}

/// Connect to the server and start emitting requests.
pub async fn connect(config: &ClientConfig) -> Result<ClientHandle> {
    let stream = connect_with_retry(config).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = transport::split(stream)?;
    log::info!("[client] {} connected to {}", config.name, writer.peer());

    let tasks = TaskGroup::new(config.name.as_str());
    let correlator = Arc::new(Mutex::new(Correlator::new()));
    let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    tasks.spawn(
        "emitter",
        emit_requests(
            writer,
            Arc::clone(&correlator),
            config.request_interval,
            rng,
            tasks.clone(),
        ),
    );
    tasks.spawn(
        "dispatcher",
        dispatch_incoming(reader, Arc::clone(&correlator), resolved_tx, tasks.clone()),
    );

    Ok(ClientHandle {
        tasks,
        correlator,
        resolutions: resolved_rx,
    })
}

/// Connect, probe the server for `config.alive_time`, then stop.
pub async fn run(config: ClientConfig) -> Result<CorrelatorStats> {
    let mut handle = connect(&config).await?;
    handle.discard_resolutions();
    handle.run_for(config.alive_time).await;

    let stats = handle.stats();
    log::info!(
        "[client] {} finished: matched={} timed_out={} open={}",
        handle.name(),
        stats.matched,
        stats.timed_out,
        handle.outstanding_ids().len()
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn emit_requests(
    writer: LineWriter,
    correlator: Arc<Mutex<Correlator>>,
    interval: DelayRange,
    mut rng: StdRng,
    tasks: TaskGroup,
) {
    let name = tasks.name().to_string();
    let mut next_id: u64 = 0;

    loop {
        next_id += 1;
        let request = Request::open(next_id);
        let text = request.request_text();

        let enqueued = correlator.lock().enqueue(request);
        if let Err(e) = enqueued {
            log::error!("[client] {name} cannot track request {next_id}: {e}");
            break;
        }
        if let Err(e) = writer.send_line(&text).await {
            log::warn!("[client] {name} write to {} failed: {e}", writer.peer());
            break;
        }
        log::debug!("[client] {name} → {text}");

        tokio::time::sleep(interval.sample(&mut rng)).await;
    }
    tasks.cancel();
}

async fn dispatch_incoming(
    mut reader: LineReader,
    correlator: Arc<Mutex<Correlator>>,
    resolved: mpsc::UnboundedSender<Request>,
    tasks: TaskGroup,
) {
    let name = tasks.name().to_string();

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::info!("[client] {name} server {} closed the connection", reader.peer());
                break;
            }
            Err(e) => {
                log::warn!("[client] {name} read from {} failed: {e}", reader.peer());
                break;
            }
        };

        let request_id = match Message::parse(&line) {
            Ok(Message::Pong { request_id, .. }) => request_id,
            Ok(Message::Keepalive { response_id }) => {
                log::trace!("[client] {name} ← keepalive {response_id}");
                continue;
            }
            Ok(Message::Ping { .. }) | Err(_) => {
                log::warn!("[client] {name} unrecognized message from server: {line:?}");
                continue;
            }
        };

        let outcome = correlator.lock().resolve(request_id, &line);
        match outcome {
            Ok(requests) => {
                for request in requests {
                    if let Some(record) = request.log_record() {
                        record.log();
                    }
                    // A closed receiver only means nobody is observing.
                    let _ = resolved.send(request);
                }
            }
            Err(e @ CorrelationError::ProtocolViolation { .. }) => {
                log::error!("[client] {name} {e}; stopping");
                break;
            }
            Err(e) => log::warn!("[client] {name} {e}; ignoring {line:?}"),
        }
    }
    tasks.cancel();
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

/// Connect errors worth retrying while the server is still starting up.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}

async fn connect_with_retry(config: &ClientConfig) -> Result<TcpStream> {
    let attempts = config.connect_retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(&config.addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < attempts && is_transient(&e) => {
                log::debug!(
                    "[client] {} connect to {} failed ({e}), retry {attempt}/{}",
                    config.name,
                    config.addr,
                    attempts - 1
                );
                tokio::time::sleep(config.connect_backoff).await;
            }
            Err(source) => {
                return Err(Error::Connect {
                    addr: config.addr.clone(),
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
