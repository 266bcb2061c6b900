//! Single-threaded reactor that drives a learner.
//!
//! The [`Reactor`] owns a tokio current-thread runtime plus a `LocalSet`, so
//! everything attached to it (engine tasks, delivery callbacks, signal
//! handling) runs on the thread that calls [`Reactor::block_on`]. Nothing in
//! here needs `Send`, matching the single-core design of the engine traits.
//!
//! Stopping goes through a [`StopHandle`], which is the only piece that may
//! cross threads.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::runtime::{EnterGuard, Runtime};
use tokio::sync::watch;
use tokio::task::{JoinHandle, LocalSet};
use tracing::debug;

/// Idempotent stop request for a reactor loop.
///
/// Cloning shares the same underlying flag. Only the first call to
/// [`StopHandle::request_stop`] has an effect.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Create a handle that has not been triggered yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the loop to stop after its current iteration.
    ///
    /// Returns `true` if this call moved the loop to stopping, `false` if a
    /// stop had already been requested.
    pub fn request_stop(&self) -> bool {
        let first = self.tx.send_if_modified(|stopping| {
            if *stopping {
                false
            } else {
                *stopping = true;
                true
            }
        });
        if first {
            debug!("reactor stop requested");
        }
        first
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until a stop is requested.
    ///
    /// Resolves immediately if the stop was requested earlier.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned event loop.
///
/// Created once per lifecycle run and destroyed when dropped. The reactor
/// is never shared: engines receive `&Reactor` during initialization to
/// attach their tasks and cannot keep it.
pub struct Reactor {
    // Field order matters: the local set drops its tasks before the runtime
    // they were registered with goes away.
    local: LocalSet,
    runtime: Runtime,
    stop: StopHandle,
}

impl Reactor {
    /// Create a reactor bound to the given stop handle.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from building the underlying runtime.
    pub fn new(stop: StopHandle) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self {
            local: LocalSet::new(),
            runtime,
            stop,
        })
    }

    /// The stop handle of this reactor.
    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Enter the runtime context, allowing tokio resources to be created
    /// outside of [`Reactor::block_on`].
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    /// Attach a task to the loop. It makes progress only while the loop runs.
    pub fn spawn_local<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.local.spawn_local(future)
    }

    /// Run the loop on the calling thread until `future` completes.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.local.block_on(&self.runtime, future)
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("stop_requested", &self.stop.is_stop_requested())
            .finish_non_exhaustive()
    }
}
