//! Store doubles shared by the daemon integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use renderizr_core::{BackendKind, KvPair};
use renderizr_daemon::{KvStore, StopSignal, StoreError, WatchBatch};

// ---------------------------------------------------------------------------
// Scripted store
// ---------------------------------------------------------------------------

/// In-memory store. `list` returns `pairs`; the first `failing_watches`
/// subscriptions fail, later ones deliver `pairs` once and stay open.
pub struct ScriptedStore {
    pairs: Mutex<Vec<KvPair>>,
    pub list_calls: AtomicUsize,
    failing_watches: usize,
    subscriptions: Mutex<Vec<Instant>>,
    open_streams: Mutex<Vec<mpsc::Sender<WatchBatch>>>,
}

impl ScriptedStore {
    pub fn new(pairs: Vec<KvPair>, failing_watches: usize) -> Arc<Self> {
        Arc::new(ScriptedStore {
            pairs: Mutex::new(pairs),
            list_calls: AtomicUsize::new(0),
            failing_watches,
            subscriptions: Mutex::new(Vec::new()),
            open_streams: Mutex::new(Vec::new()),
        })
    }

    pub fn subscription_times(&self) -> Vec<Instant> {
        self.subscriptions.lock().unwrap().clone()
    }
}

impl KvStore for ScriptedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Consul
    }

    fn list(&self, _prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pairs.lock().unwrap().clone())
    }

    fn watch_tree(
        &self,
        _prefix: &str,
        _stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.push(Instant::now());
        if subs.len() <= self.failing_watches {
            return Err(StoreError::Request {
                backend: BackendKind::Consul,
                detail: "connection refused".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Ok(self.pairs.lock().unwrap().clone()))
            .expect("fresh channel has room");
        self.open_streams.lock().unwrap().push(tx);
        Ok(rx)
    }

    fn supports_watch(&self) -> bool {
        true
    }
}

pub struct Failing;

impl KvStore for Failing {
    fn kind(&self) -> BackendKind {
        BackendKind::Etcd
    }

    fn list(&self, _prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        Err(StoreError::Request {
            backend: BackendKind::Etcd,
            detail: "unreachable".to_string(),
        })
    }

    fn watch_tree(
        &self,
        _prefix: &str,
        _stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        // A stream that closes immediately.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn supports_watch(&self) -> bool {
        true
    }
}

pub async fn wait_for_content(path: &Path, expected: &str) {
    for _ in 0..1000 {
        if std::fs::read_to_string(path).ok().as_deref() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never contained {expected:?}", path.display());
}
