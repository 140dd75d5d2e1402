//! Consul KV client over the HTTP API.
//!
//! `list` is `GET /v1/kv/<prefix>?recurse`; watching uses blocking queries
//! (`index` + `wait`) and re-lists the whole prefix whenever the index moves.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Deserialize;
use tokio::sync::mpsc;

use renderizr_core::{BackendKind, KvPair};

use crate::error::StoreError;
use crate::signal::StopSignal;
use crate::store::{base_urls, call_any, spawn_watcher, url_path, HttpFailure, KvStore, WatchBatch};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";
const BLOCKING_WAIT: &str = "30s";
const READ_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulEntry {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Clone)]
pub struct ConsulStore {
    agent: ureq::Agent,
    urls: Vec<String>,
    token: Option<String>,
}

impl ConsulStore {
    pub fn new(endpoints: Vec<String>, scheme: &str, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(READ_TIMEOUT)
            .build();
        ConsulStore {
            agent,
            urls: base_urls(scheme, &endpoints),
            token,
        }
    }

    fn fail(detail: impl Into<String>) -> StoreError {
        StoreError::Request {
            backend: BackendKind::Consul,
            detail: detail.into(),
        }
    }

    /// One recursive read, blocking on `index` when given.
    ///
    /// Returns the pairs and the index reported by the server, or `None` when
    /// a blocking query timed out without a change.
    fn query(
        &self,
        prefix: &str,
        index: Option<u64>,
    ) -> Result<Option<(Vec<KvPair>, u64)>, StoreError> {
        let path = format!("/v1/kv/{}", url_path(prefix));
        let index_value = index.map(|i| i.to_string());
        let mut query = vec![("recurse", "true")];
        if let Some(i) = index_value.as_deref() {
            query.push(("index", i));
            query.push(("wait", BLOCKING_WAIT));
        }
        let headers: Vec<(&str, &str)> = self
            .token
            .as_deref()
            .map(|t| vec![(TOKEN_HEADER, t)])
            .unwrap_or_default();

        match call_any(&self.agent, &self.urls, &path, &query, &headers) {
            Ok(response) => {
                let index = parse_index(response.header(INDEX_HEADER));
                let body = response
                    .into_string()
                    .map_err(|e| Self::fail(format!("reading {path}: {e}")))?;
                Ok(Some((decode_list(&body)?, index)))
            }
            // An empty prefix is not an error.
            Err(HttpFailure::NotFound(response)) => {
                Ok(Some((Vec::new(), parse_index(response.header(INDEX_HEADER)))))
            }
            Err(HttpFailure::Timeout) if index.is_some() => Ok(None),
            Err(HttpFailure::Timeout) => Err(Self::fail(format!("{path}: timed out"))),
            Err(HttpFailure::Failed(detail)) => Err(Self::fail(detail)),
        }
    }
}

fn parse_index(header: Option<&str>) -> u64 {
    header.and_then(|h| h.trim().parse().ok()).unwrap_or(0)
}

/// Decode a `?recurse` response body into pairs rooted at `/`.
///
/// Folder entries (no value, trailing `/`) are skipped.
pub(crate) fn decode_list(body: &str) -> Result<Vec<KvPair>, StoreError> {
    let entries: Vec<ConsulEntry> = serde_json::from_str(body).map_err(|e| StoreError::Decode {
        backend: BackendKind::Consul,
        detail: e.to_string(),
    })?;
    let mut pairs = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.key.ends_with('/') && entry.value.is_none() {
            continue;
        }
        let value = match entry.value {
            Some(encoded) => {
                let raw = BASE64_STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| StoreError::Decode {
                        backend: BackendKind::Consul,
                        detail: format!("value of {}: {e}", entry.key),
                    })?;
                String::from_utf8_lossy(&raw).into_owned()
            }
            None => String::new(),
        };
        pairs.push(KvPair::new(format!("/{}", entry.key.trim_start_matches('/')), value));
    }
    Ok(pairs)
}

impl KvStore for ConsulStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Consul
    }

    fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        match self.query(prefix, None)? {
            Some((pairs, _)) => Ok(pairs),
            None => Ok(Vec::new()),
        }
    }

    fn watch_tree(
        &self,
        prefix: &str,
        stop: StopSignal,
    ) -> Result<mpsc::Receiver<WatchBatch>, StoreError> {
        let client = self.clone();
        let prefix = prefix.to_string();
        let mut last_index: Option<u64> = None;
        spawn_watcher(format!("consul {prefix}"), stop, move || {
            let Some((pairs, index)) = client.query(&prefix, last_index)? else {
                return Ok(None);
            };
            if last_index == Some(index) {
                return Ok(None);
            }
            last_index = Some(index);
            Ok(Some(pairs))
        })
    }

    fn supports_watch(&self) -> bool {
        true
    }
}
