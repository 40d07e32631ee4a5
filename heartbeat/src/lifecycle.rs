//! Alive-time window and cancellation for actor loops.
//!
//! Every actor (a client, the server, each server session) spawns its
//! background loops through a [`TaskGroup`].  Cancelling the group is abrupt:
//! each loop is raced against the group's [`CancellationToken`] and simply
//! dropped at its current await point, whether that is a socket read, a
//! write, or a sleep.  There is no handshake, flush, or drain phase, and the
//! loops produce no completion value.
//!
//! Groups nest: a [`TaskGroup::child`] is cancelled together with its parent,
//! which is how stopping the server reaches every session it created.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A set of cancellable background loops belonging to one actor.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    name: Arc<str>,
    token: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskGroup {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_token(name.into(), CancellationToken::new())
    }

    /// A group that is cancelled whenever `self` is.
    pub fn child(&self, name: impl Into<Arc<str>>) -> Self {
        Self::with_token(name.into(), self.token.child_token())
    }

    fn with_token(name: Arc<str>, token: CancellationToken) -> Self {
        Self {
            name,
            token,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn `fut` as one loop of this group.
    ///
    /// The loop stops at its next await point once the group is cancelled.
    /// Spawning into an already-cancelled group starts nothing useful: the
    /// future is dropped before its first poll.
    pub fn spawn<F>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let name = Arc::clone(&self.name);
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::trace!("[lifecycle] {name}/{task} cancelled");
                }
                _ = fut => {
                    log::trace!("[lifecycle] {name}/{task} finished");
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Cancel every loop of this group and of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the group has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Wait for every loop spawned so far to end.
    ///
    /// Loops only end on their own or through [`cancel`](Self::cancel), so
    /// call this after cancelling to be sure nothing is still running.
    pub async fn join(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("[lifecycle] {} task failed: {e}", self.name);
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Keep `group` alive for `alive_time`, then cancel it.
///
/// Returns early if the group is cancelled some other way (for example when
/// its connection is lost).  Expiry is a normal stop, not a failure.
pub async fn expire_after(group: &TaskGroup, alive_time: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(alive_time) => {
            log::info!("[lifecycle] {} alive time of {alive_time:?} elapsed, stopping", group.name());
        }
        _ = group.cancelled() => {
            log::info!("[lifecycle] {} stopped before its alive time elapsed", group.name());
        }
    }
    group.cancel();
    group.join().await;
}
