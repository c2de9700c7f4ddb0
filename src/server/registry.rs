//! Supervisor owning every live listener.
//!
//! Constructed once in `main` and shared by `Arc`. Signal handling only calls
//! [`Supervisor::cancel`]; the main thread then runs [`Supervisor::shutdown`]
//! and exits with [`Supervisor::exit_code`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::listener::{ListenerHandle, ListenerKind};

#[derive(Debug, Default)]
struct Inner {
    handles: Vec<ListenerHandle>,
    /// Set once shutdown has begun; later registrations are shut down on arrival.
    closed: bool,
}

/// Registry of live listeners plus the process-wide cancellation state.
#[derive(Debug, Default)]
pub struct Supervisor {
    inner: Mutex<Inner>,
    cancelled: AtomicBool,
    exit_code: AtomicI32,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a started listener.
    pub fn register(&self, handle: ListenerHandle) {
        let mut inner = self.lock();
        if inner.closed {
            drop(inner);
            debug!(name = handle.name(), "registered after shutdown, closing immediately");
            handle.shutdown();
            return;
        }
        debug!(name = handle.name(), kind = %handle.kind(), address = %handle.local_addr(), "listener registered");
        inner.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name, kind and address of every registered listener.
    pub fn listeners(&self) -> Vec<(String, ListenerKind, SocketAddr)> {
        self.lock()
            .handles
            .iter()
            .map(|h| (h.name().to_string(), h.kind(), h.local_addr()))
            .collect()
    }

    /// Pop and shut down every listener until none remain.
    ///
    /// Returns how many listeners this call shut down; a repeated call
    /// returns 0.
    pub fn shutdown(&self) -> usize {
        self.lock().closed = true;

        let mut count = 0;
        loop {
            // Lock released before shutting the handle down.
            let next = self.lock().handles.pop();
            let Some(handle) = next else {
                break;
            };
            handle.shutdown();
            debug!(name = handle.name(), "listener stopped");
            count += 1;
        }

        if count > 0 {
            info!(listeners = count, "all listeners shut down");
        }
        count
    }

    /// Request process termination with `code` as exit status.
    ///
    /// Only records the request and wakes the primary accept loop; teardown
    /// happens on the thread that called `serve_forever`.
    pub fn cancel(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        for handle in self.lock().handles.iter() {
            if handle.kind() == ListenerKind::Primary {
                handle.wake();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Status the process should exit with (0 unless cancelled by a signal).
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Guard that shuts every listener down when dropped.
    pub fn guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard(Arc::clone(self))
    }
}

/// Runs [`Supervisor::shutdown`] on scope exit, including early `?` returns.
#[derive(Debug)]
pub struct ShutdownGuard(Arc<Supervisor>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
