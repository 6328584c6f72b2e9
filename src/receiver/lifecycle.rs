//! Shutdown coordination shared by both OTLP transports.
//!
//! The state machine is `Running -> Stopping -> Stopped`. The first caller of
//! [`Lifecycle::initiate`] runs the stop hook and then raises the terminate
//! signal that the transport's serve loop watches. The serve loop reports back
//! through [`Lifecycle::exit_serve`], which moves the state to `Stopped` and
//! releases every [`Lifecycle::stop_wait`] caller.

use super::StopHook;
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Observable lifecycle state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting requests, or not started yet
    Running,
    /// Shutdown began; waiting for the serve loop to return
    Stopping,
    /// Serve loop returned (or never ran)
    Stopped,
}

struct Inner {
    state: LifecycleState,
    active_serves: usize,
    hook: Option<StopHook>,
}

/// Exactly-once shutdown sequence with a completion broadcast.
pub struct Lifecycle {
    inner: Mutex<Inner>,
    terminate: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
}

impl Lifecycle {
    /// Creates a running lifecycle that will call `hook` on the first stop.
    pub fn new(hook: StopHook) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Running,
                active_serves: 0,
                hook: Some(hook),
            }),
            terminate: watch::channel(false).0,
            stopped: watch::channel(false).0,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    /// Runs the shutdown sequence if no one has yet.
    ///
    /// Returns `true` only for the caller that ran it. A failing hook is
    /// logged and shutdown continues.
    pub fn initiate(&self) -> bool {
        let hook = {
            let mut inner = self.inner.lock();
            if inner.state != LifecycleState::Running {
                return false;
            }
            inner.state = LifecycleState::Stopping;
            inner.hook.take()
        };

        if let Some(hook) = hook {
            if let Err(e) = hook() {
                warn!("Stop hook failed: {:#}", e);
            }
        }

        self.terminate.send_replace(true);

        let mut inner = self.inner.lock();
        if inner.active_serves == 0 {
            // Nothing is serving, so nothing will report completion.
            inner.state = LifecycleState::Stopped;
            drop(inner);
            self.stopped.send_replace(true);
        }
        debug!("Shutdown initiated");
        true
    }

    /// Starts the shutdown sequence and waits until no serve loop is running.
    pub async fn stop_wait(&self) {
        self.initiate();
        let mut rx = self.stopped.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Registers a serve loop. Returns `false` when shutdown already began,
    /// in which case the caller must return without serving.
    pub fn enter_serve(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Running {
            return false;
        }
        inner.active_serves += 1;
        true
    }

    /// Reports that a serve loop returned.
    pub fn exit_serve(&self) {
        let mut inner = self.inner.lock();
        inner.active_serves = inner.active_serves.saturating_sub(1);
        if inner.active_serves == 0 && inner.state == LifecycleState::Stopping {
            inner.state = LifecycleState::Stopped;
            drop(inner);
            self.stopped.send_replace(true);
        }
    }

    /// Resolves once shutdown has been initiated.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.terminate.subscribe();
        async move {
            let _ = rx.wait_for(|terminate| *terminate).await;
        }
    }
}
