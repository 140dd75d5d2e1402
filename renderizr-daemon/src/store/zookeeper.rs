//! ZooKeeper client.
//!
//! Keys are znode paths and values are their data. `list` walks the subtree
//! under the prefix and returns every childless znode. Watching opens a
//! dedicated session whose default watcher receives one-shot child and data
//! watches armed during the walk; any event triggers a fresh walk, which
//! re-arms them, so each batch is a complete snapshot.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use zookeeper::{KeeperState, WatchedEvent, WatchedEventType, Watcher, ZkError, ZooKeeper};

use renderizr_core::{BackendKind, KvPair};

use crate::error::StoreError;
use crate::signal::StopSignal;
use crate::store::{spawn_watcher, KvStore, WatchBatch};

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on one idle wait, so the watch thread notices stop.
const EVENT_POLL: Duration = Duration::from_secs(1);
/// ZooKeeper's own bookkeeping subtree.
const SYSTEM_NODE: &str = "/zookeeper";

/// Closes the session when the last user goes away.
struct Session(ZooKeeper);

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.0.close() {
            tracing::debug!(error = ?err, "closing zookeeper session");
        }
    }
}

/// Session watcher for `list`; only logs state changes.
struct StateLogger;

impl Watcher for StateLogger {
    fn handle(&self, event: WatchedEvent) {
        tracing::debug!(state = ?event.keeper_state, "zookeeper session state");
    }
}

enum Change {
    Node,
    Expired,
}

/// Session watcher for `watch_tree`; forwards node events to the thread.
struct ChangeNotifier(Mutex<std_mpsc::Sender<Change>>);

impl Watcher for ChangeNotifier {
    fn handle(&self, event: WatchedEvent) {
        let change = match (&event.event_type, &event.keeper_state) {
            (_, KeeperState::Expired) => Change::Expired,
            (WatchedEventType::None, _) => return,
            _ => Change::Node,
        };
        tracing::trace!(path = ?event.path, kind = ?event.event_type, "zookeeper event");
        let _ = self.0.lock().send(change);
    }
}

pub struct ZookeeperStore {
    connect_string: String,
    session: Mutex<Option<Arc<Session>>>,
}

impl ZookeeperStore {
    pub fn new(endpoints: Vec<String>) -> Self {
        ZookeeperStore {
            connect_string: connect_string(&endpoints),
            session: Mutex::new(None),
        }
    }

    fn connect<W: Watcher + 'static>(&self, watcher: W) -> Result<Session, StoreError> {
        ZooKeeper::connect(&self.connect_string, SESSION_TIMEOUT, watcher)
            .map(Session)
            .map_err(|err| fail(format!("connecting to {}: {err:?}", self.connect_string)))
    }

    /// Shared session for one-shot listing, reconnected after a failure.
    fn shared(&self) -> Result<Arc<Session>, StoreError> {
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(self.connect(StateLogger)?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }
}

fn fail(detail: impl Into<String>) -> StoreError {
    StoreError::Request {
        backend: BackendKind::Zookeeper,
        detail: detail.into(),
    }
}

pub(crate) fn connect_string(endpoints: &[String]) -> String {
    endpoints
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Znode path of `child` under `parent`.
pub(crate) fn child_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Collect childless znodes under `path`. With `watch`, arms a child watch
/// on every node and a data watch on every leaf.
fn walk(zk: &ZooKeeper, path: &str, watch: bool, out: &mut Vec<KvPair>) -> Result<(), ZkError> {
    let children = match zk.get_children(path, watch) {
        Ok(children) => children,
        Err(ZkError::NoNode) => {
            if watch {
                // Fires once the node is created.
                zk.exists(path, true)?;
            }
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    if children.is_empty() {
        if path == "/" {
            return Ok(());
        }
        match zk.get_data(path, watch) {
            Ok((data, _)) => out.push(KvPair::new(path, String::from_utf8_lossy(&data).into_owned())),
            Err(ZkError::NoNode) => {}
            Err(err) => return Err(err),
        }
        return Ok(());
    }

    for child in children {
        let child = child_path(path, &child);
        if child == SYSTEM_NODE {
            continue;
        }
        walk(zk, &child, watch, out)?;
    }
    Ok(())
}

impl KvStore for ZookeeperStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Zookeeper
    }

    fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        let session = self.shared()?;
        let mut pairs = Vec::new();
        if let Err(err) = walk(&session.0, prefix, false, &mut pairs) {
            self.session.lock().take();
            return Err(fail(format!("listing {prefix}: {err:?}")));
        }
        Ok(pairs)
    }

    fn watch_tree(
        &self,
        prefix: &str,
        stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        let (events_tx, events) = std_mpsc::channel();
        let session = self.connect(ChangeNotifier(Mutex::new(events_tx)))?;
        let prefix = prefix.to_string();
        let mut primed = false;

        spawn_watcher(format!("zookeeper {prefix}"), stop, move || {
            if primed {
                match events.recv_timeout(EVENT_POLL) {
                    Ok(Change::Node) => {}
                    Ok(Change::Expired) => return Err(fail("session expired")),
                    Err(std_mpsc::RecvTimeoutError::Timeout) => return Ok(None),
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(fail("session watcher dropped"))
                    }
                }
                // One walk covers every event queued so far.
                while events.try_recv().is_ok() {}
            }
            let mut pairs = Vec::new();
            walk(&session.0, &prefix, true, &mut pairs)
                .map_err(|err| fail(format!("watching {prefix}: {err:?}")))?;
            primed = true;
            Ok(Some(pairs))
        })
    }

    fn supports_watch(&self) -> bool {
        true
    }
}
