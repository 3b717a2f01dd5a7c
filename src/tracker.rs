//! Open connection tracking
//!
//! Every accepted connection runs as its own task. The tracker keeps the
//! abort handle of each live task so the whole set can be torn down at
//! once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, AbortHandle>>,
    stopped: AtomicBool,
}

/// Set of connections currently being served
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

/// Removes a connection from the set when its task ends or is aborted
struct Untrack {
    id: u64,
    inner: Arc<Inner>,
}

impl Drop for Untrack {
    fn drop(&mut self) {
        self.inner.open.lock().remove(&self.id);
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a connection on its own tracked task.
    ///
    /// Returns `false`, dropping the connection, once the tracker has been
    /// stopped.
    pub fn spawn<F>(&self, connection: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let untrack = Untrack {
            id,
            inner: Arc::clone(&self.inner),
        };

        // The task waits until it is registered, so it can never finish
        // before its entry exists.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _untrack = untrack;
            if registered_rx.await.is_ok() {
                connection.await;
            }
        });

        {
            let mut open = self.inner.open.lock();
            if self.inner.stopped.load(Ordering::Acquire) {
                drop(open);
                task.abort();
                return false;
            }
            open.insert(id, task.abort_handle());
        }
        let _ = registered_tx.send(());
        true
    }

    /// Abort every open connection and refuse new ones.
    ///
    /// Only the first call does anything; it returns the number of
    /// connections closed, later calls return 0.
    pub fn force_close_all(&self) -> usize {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let open: Vec<AbortHandle> = self.inner.open.lock().drain().map(|(_, h)| h).collect();
        for handle in &open {
            handle.abort();
        }
        open.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Number of connections currently open
    pub fn len(&self) -> usize {
        self.inner.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
