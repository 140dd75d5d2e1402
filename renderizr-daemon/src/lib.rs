//! renderizr runtime: KV store clients, processors, and the coordinator that
//! keeps every template in sync until shutdown.

mod coordinator;
mod error;
pub mod processor;
pub mod signal;
pub mod store;

pub use coordinator::{init_tracing, start_blocking, Coordinator, LogConfig, ERROR_CHANNEL_CAPACITY};
pub use error::{DaemonError, ProcessError, StoreError};
pub use processor::{Interval, OnDemand, Processor, Watch, WATCH_RETRY_BACKOFF};
pub use signal::{StopHandle, StopSignal};
pub use store::{from_backend_config, KvStore, WatchBatch};
