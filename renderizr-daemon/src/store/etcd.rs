//! etcd client over the v2 keys API.
//!
//! `list` is `GET /v2/keys/<prefix>?recursive=true`. Watching long-polls
//! `?wait=true&recursive=true&waitIndex=<n>` and re-lists the prefix after
//! every event so each batch is a complete snapshot.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use renderizr_core::{BackendKind, KvPair};

use crate::error::StoreError;
use crate::signal::StopSignal;
use crate::store::{base_urls, call_any, spawn_watcher, url_path, HttpFailure, KvStore, WatchBatch};

const INDEX_HEADER: &str = "X-Etcd-Index";
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    node: EtcdNode,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
}

#[derive(Clone)]
pub struct EtcdStore {
    agent: ureq::Agent,
    urls: Vec<String>,
}

impl EtcdStore {
    pub fn new(endpoints: Vec<String>, scheme: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(READ_TIMEOUT)
            .build();
        EtcdStore {
            agent,
            urls: base_urls(scheme, &endpoints),
        }
    }

    fn fail(detail: impl Into<String>) -> StoreError {
        StoreError::Request {
            backend: BackendKind::Etcd,
            detail: detail.into(),
        }
    }

    fn keys_path(prefix: &str) -> String {
        format!("/v2/keys/{}", url_path(prefix))
    }

    fn list_with_index(&self, prefix: &str) -> Result<(Vec<KvPair>, u64), StoreError> {
        let path = Self::keys_path(prefix);
        match call_any(&self.agent, &self.urls, &path, &[("recursive", "true")], &[]) {
            Ok(response) => {
                let index = parse_index(response.header(INDEX_HEADER));
                let body = response
                    .into_string()
                    .map_err(|e| Self::fail(format!("reading {path}: {e}")))?;
                Ok((decode_list(&body)?, index))
            }
            Err(HttpFailure::NotFound(response)) => {
                Ok((Vec::new(), parse_index(response.header(INDEX_HEADER))))
            }
            Err(HttpFailure::Timeout) => Err(Self::fail(format!("{path}: timed out"))),
            Err(HttpFailure::Failed(detail)) => Err(Self::fail(detail)),
        }
    }

    /// Long-poll for the next change after `index`; `false` on an idle timeout.
    fn wait_for_change(&self, prefix: &str, index: u64) -> Result<bool, StoreError> {
        let path = Self::keys_path(prefix);
        let wait_index = (index + 1).to_string();
        let query = [
            ("wait", "true"),
            ("recursive", "true"),
            ("waitIndex", wait_index.as_str()),
        ];
        match call_any(&self.agent, &self.urls, &path, &query, &[]) {
            Ok(_) => Ok(true),
            Err(HttpFailure::Timeout) => Ok(false),
            Err(HttpFailure::NotFound(_)) => Err(Self::fail(format!("{path}: not found"))),
            Err(HttpFailure::Failed(detail)) => Err(Self::fail(detail)),
        }
    }
}

fn parse_index(header: Option<&str>) -> u64 {
    header.and_then(|h| h.trim().parse().ok()).unwrap_or(0)
}

/// Flatten a keys response into its leaf pairs.
pub(crate) fn decode_list(body: &str) -> Result<Vec<KvPair>, StoreError> {
    let response: EtcdResponse = serde_json::from_str(body).map_err(|e| StoreError::Decode {
        backend: BackendKind::Etcd,
        detail: e.to_string(),
    })?;
    let mut pairs = Vec::new();
    collect_leaves(response.node, &mut pairs);
    Ok(pairs)
}

fn collect_leaves(node: EtcdNode, out: &mut Vec<KvPair>) {
    if node.dir {
        for child in node.nodes {
            collect_leaves(child, out);
        }
        return;
    }
    if let Some(key) = node.key {
        out.push(KvPair::new(key, node.value.unwrap_or_default()));
    }
}

impl KvStore for EtcdStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Etcd
    }

    fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        self.list_with_index(prefix).map(|(pairs, _)| pairs)
    }

    fn watch_tree(
        &self,
        prefix: &str,
        stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        let client = self.clone();
        let prefix = prefix.to_string();
        let mut last_index: Option<u64> = None;
        spawn_watcher(format!("etcd {prefix}"), stop, move || {
            if let Some(index) = last_index {
                if !client.wait_for_change(&prefix, index)? {
                    return Ok(None);
                }
            }
            let (pairs, index) = client.list_with_index(&prefix)?;
            last_index = Some(index);
            Ok(Some(pairs))
        })
    }

    fn supports_watch(&self) -> bool {
        true
    }
}
