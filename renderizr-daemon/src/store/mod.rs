//! KV store clients.
//!
//! Every client exposes the same two primitives: a one-shot recursive
//! `list`, and `watch_tree`, which streams full snapshots of a prefix each
//! time something under it changes. The first batch on a watch stream is the
//! current state.

mod consul;
mod etcd;
mod fs;
mod zookeeper;

use std::sync::Arc;

use tokio::sync::mpsc;

use renderizr_core::{BackendConfig, BackendKind, KvPair};

use crate::error::StoreError;
use crate::signal::StopSignal;

pub use consul::ConsulStore;
pub use etcd::EtcdStore;
pub use fs::FsStore;
pub use zookeeper::ZookeeperStore;

/// Items delivered on a watch stream.
pub type WatchBatch = Result<Vec<KvPair>, StoreError>;

/// Channel depth of a watch stream.
pub(crate) const WATCH_CHANNEL_CAPACITY: usize = 1;

pub trait KvStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Every pair whose key lies under `prefix`, keys rooted at `/`.
    fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError>;

    /// Stream full snapshots of `prefix` until `stop` is raised or the
    /// receiver is dropped.
    fn watch_tree(
        &self,
        prefix: &str,
        stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError>;

    fn supports_watch(&self) -> bool;
}

/// Build the client for `config`.
pub fn from_backend_config(config: &BackendConfig) -> Arc<dyn KvStore> {
    match config {
        BackendConfig::Consul {
            endpoints,
            scheme,
            token,
        } => Arc::new(ConsulStore::new(endpoints.clone(), scheme, token.clone())),
        BackendConfig::Etcd { endpoints, scheme } => {
            Arc::new(EtcdStore::new(endpoints.clone(), scheme))
        }
        BackendConfig::Zookeeper { endpoints } => {
            Arc::new(ZookeeperStore::new(endpoints.clone()))
        }
        BackendConfig::Fs {
            root,
            max_file_size,
        } => Arc::new(FsStore::new(root.clone(), *max_file_size)),
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by the Consul and etcd clients
// ---------------------------------------------------------------------------

pub(crate) fn base_urls(scheme: &str, endpoints: &[String]) -> Vec<String> {
    endpoints
        .iter()
        .map(|ep| {
            let ep = ep.trim_end_matches('/');
            if ep.contains("://") {
                ep.to_string()
            } else {
                format!("{scheme}://{ep}")
            }
        })
        .collect()
}

/// Prefix path without its leading slash, as used in HTTP KV URLs.
pub(crate) fn url_path(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

/// Outcome of a failed [`call_any`].
#[derive(Debug)]
pub(crate) enum HttpFailure {
    /// The server answered 404; the response still carries index headers.
    NotFound(Box<ureq::Response>),
    /// A long poll hit the read timeout without a change.
    Timeout,
    Failed(String),
}

/// GET `path` from the first endpoint that answers.
///
/// Transport failures fall through to the next endpoint; an HTTP status from
/// any server is final.
pub(crate) fn call_any(
    agent: &ureq::Agent,
    urls: &[String],
    path: &str,
    query: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> Result<ureq::Response, HttpFailure> {
    let mut last = String::from("no endpoints configured");
    for base in urls {
        let url = format!("{base}{path}");
        let mut request = agent.get(&url);
        for (k, v) in query {
            request = request.query(k, v);
        }
        for (k, v) in headers {
            request = request.set(k, v);
        }
        match request.call() {
            Ok(response) => return Ok(response),
            Err(ureq::Error::Status(404, response)) => {
                return Err(HttpFailure::NotFound(Box::new(response)))
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(HttpFailure::Failed(format!(
                    "{url}: status {code}: {}",
                    body.trim()
                )));
            }
            Err(err) if is_timeout(&err) => return Err(HttpFailure::Timeout),
            Err(err) => {
                tracing::warn!(endpoint = %base, error = %err, "endpoint unreachable");
                last = format!("{url}: {err}");
            }
        }
    }
    Err(HttpFailure::Failed(last))
}

/// `true` when a transport error is a read timeout of a long poll.
fn is_timeout(err: &ureq::Error) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(inner) = cause {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        cause = inner.source();
    }
    false
}

/// Spawn the blocking thread that feeds a watch stream.
///
/// `poll` is called repeatedly; it returns `Ok(Some(batch))` when the prefix
/// changed, `Ok(None)` on an idle poll, and `Err` to report and end the
/// stream.
pub(crate) fn spawn_watcher<F>(
    name: String,
    stop: StopSignal,
    mut poll: F,
) -> Result<mpsc::Receiver<WatchBatch>, StoreError>
where
    F: FnMut() -> Result<Option<Vec<KvPair>>, StoreError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    std::thread::Builder::new()
        .name(format!("watch {name}"))
        .spawn(move || {
            while !stop.is_stopped() && !tx.is_closed() {
                match poll() {
                    Ok(Some(batch)) => {
                        if tx.blocking_send(Ok(batch)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let _ = tx.blocking_send(Err(err));
                        break;
                    }
                }
            }
            tracing::debug!(watcher = %name, "watch thread exiting");
        })
        .map_err(StoreError::Spawn)?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_add_scheme_when_missing() {
        let urls = base_urls(
            "http",
            &["127.0.0.1:8500".to_string(), "https://c:8501/".to_string()],
        );
        assert_eq!(urls, vec!["http://127.0.0.1:8500", "https://c:8501"]);
        assert_eq!(url_path("/app/db"), "app/db");
        assert_eq!(url_path("/"), "");
    }

    #[test]
    fn every_backend_config_builds_its_client() {
        let configs = [
            BackendConfig::consul_default(),
            BackendConfig::etcd_default(),
            BackendConfig::zookeeper_default(),
            BackendConfig::fs("/srv/kv"),
        ];
        for config in configs {
            let store = from_backend_config(&config);
            assert_eq!(store.kind(), config.kind());
            assert_eq!(store.supports_watch(), config.supports_watch());
        }
    }
}
