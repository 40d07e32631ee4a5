//! Server actor: listener, shared context and session registry.
//!
//! There is exactly one [`ServerContext`] per server.  It owns the shared
//! id counters and the registry of live sessions and is handed to every
//! session as an `Arc` when the connection is accepted.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::ids::IdAllocator;
use crate::lifecycle::{self, TaskGroup};
use crate::session::{self, SessionHandle};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// ServerContext
// ---------------------------------------------------------------------------

/// State shared by every session of one server.
#[derive(Debug, Default)]
pub struct ServerContext {
    ids: IdAllocator,
    sessions: Mutex<HashMap<u64, SessionHandle>>,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn register(&self, session: SessionHandle) {
        self.sessions.lock().insert(session.client_id(), session);
    }

    pub fn unregister(&self, client_id: u64) -> Option<SessionHandle> {
        self.sessions.lock().remove(&client_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Client ids of the live sessions, ascending.
    pub fn client_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sessions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every session from the registry and hand them to the caller.
    fn drain_sessions(&self) -> Vec<SessionHandle> {
        self.sessions.lock().drain().map(|(_, s)| s).collect()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound, not yet accepting, server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Bind the listening socket on `config.addr`.
    ///
    /// Port `0` lets the OS choose; read it back with [`Server::local_addr`].
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.addr).await?;
        log::info!("[server] listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            ctx: Arc::new(ServerContext::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start accepting connections in the background.
    pub fn start(self) -> Result<ServerHandle> {
        let local_addr = self.listener.local_addr()?;
        let tasks = TaskGroup::new("server");
        tasks.spawn(
            "accept",
            accept_loop(
                self.listener,
                Arc::clone(&self.ctx),
                tasks.clone(),
                self.config,
            ),
        );
        Ok(ServerHandle {
            local_addr,
            ctx: self.ctx,
            tasks,
        })
    }
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    tasks: TaskGroup,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn is_stopped(&self) -> bool {
        self.tasks.is_cancelled()
    }

    /// Run until `alive_time` has elapsed, then stop.
    pub async fn run_for(&self, alive_time: Duration) {
        lifecycle::expire_after(&self.tasks, alive_time).await;
        self.stop().await;
    }

    /// Stop accepting and cancel every session this server created.
    pub async fn stop(&self) {
        self.tasks.cancel();
        // The accept loop must be gone before draining, or a session accepted
        // mid-stop could register after the drain.
        self.tasks.join().await;
        let sessions = self.ctx.drain_sessions();
        for session in &sessions {
            session.stop().await;
        }
        log::info!("[server] stopped ({} live sessions cancelled)", sessions.len());
    }
}

/// Bind, serve for `config.alive_time`, then cancel everything.
pub async fn run(config: ServerConfig) -> Result<()> {
    let alive_time = config.alive_time;
    let handle = Server::bind(config).await?.start()?;
    handle.run_for(alive_time).await;
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tasks: TaskGroup,
    config: ServerConfig,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Typically fd exhaustion; back off instead of spinning.
                log::warn!("[server] accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        match session::start(Arc::clone(&ctx), stream, &tasks, &config) {
            Ok(session) => {
                log::info!("[server] client {} connected from {peer}", session.client_id())
            }
            Err(e) => log::warn!("[server] could not start session for {peer}: {e}"),
        }
    }
}
