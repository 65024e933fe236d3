//! Coalescing background writer for one storage key
//!
//! Callers mark the key dirty; the worker renders the *current* state when
//! it gets to run, so bursts collapse into one write and an older state can
//! never land after a newer one.

use crate::kv::KvStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Dirty,
    Flush(oneshot::Sender<()>),
}

/// Handle to a single-writer persistence task
#[derive(Debug, Clone)]
pub(crate) struct PersistHandle {
    key: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
}

impl PersistHandle {
    /// Spawn the writer; `render` returns the value to store, or `None` to remove the key
    ///
    /// Must be called inside a tokio runtime.
    pub(crate) fn spawn<F>(kv: Arc<dyn KvStore>, key: impl Into<String>, render: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        let key: Arc<str> = Arc::from(key.into());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_key = Arc::clone(&key);
        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut dirty = false;
                let mut waiters = Vec::new();
                let mut next = Some(first);
                while let Some(command) = next {
                    match command {
                        Command::Dirty => dirty = true,
                        Command::Flush(reply) => waiters.push(reply),
                    }
                    next = rx.try_recv().ok();
                }
                if dirty {
                    let result = match render() {
                        Some(value) => kv.set(&task_key, value).await,
                        None => kv.remove(&task_key).await,
                    };
                    if let Err(error) = result {
                        tracing::warn!(key = %task_key, %error, "persisting state failed");
                    }
                }
                for waiter in waiters {
                    let _ = waiter.send(());
                }
            }
            tracing::debug!(key = %task_key, "persistence writer stopped");
        });
        Self { key, tx }
    }

    /// Schedule a write of the current state
    pub(crate) fn mark_dirty(&self) {
        if self.tx.send(Command::Dirty).is_err() {
            tracing::debug!(key = %self.key, "persistence writer gone, dropping write");
        }
    }

    /// Wait until every write scheduled before this call has been stored
    pub(crate) async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn writes_latest_state_and_coalesces() {
        let kv = Arc::new(MemoryKvStore::new());
        let state = Arc::new(Mutex::new(0));
        let renders = Arc::new(AtomicUsize::new(0));
        let (s, r) = (Arc::clone(&state), Arc::clone(&renders));
        let handle = PersistHandle::spawn(kv.clone(), "counter", move || {
            r.fetch_add(1, Ordering::SeqCst);
            Some(json!(*s.lock()))
        });

        for i in 1..=50 {
            *state.lock() = i;
            handle.mark_dirty();
        }
        handle.flush().await;

        assert_eq!(kv.peek("counter"), Some(json!(50)));
        assert!(renders.load(Ordering::SeqCst) <= 50);
    }

    #[tokio::test]
    async fn none_removes_key() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("gone", json!(1)).await.unwrap();
        let handle = PersistHandle::spawn(kv.clone(), "gone", || None);
        handle.mark_dirty();
        handle.flush().await;
        assert_eq!(kv.peek("gone"), None);
    }
}
