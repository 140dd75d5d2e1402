//! Processors decide *when* a template is rendered.
//!
//! | processor  | behaviour                                                      |
//! |------------|----------------------------------------------------------------|
//! | `OnDemand` | list the prefix once and render                                |
//! | `Interval` | run an inner processor, then wait `interval` or stop; repeat   |
//! | `Watch`    | render every batch from `watch_tree`; resubscribe after errors |
//!
//! `Interval` and `Watch` only return once the stop signal is raised. Errors
//! from individual iterations go to the shared error channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use renderizr_core::KvPair;
use renderizr_sync::{RenderOutcome, TemplateRenderer};

use crate::error::{ProcessError, StoreError};
use crate::signal::StopSignal;
use crate::store::KvStore;

/// Delay before resubscribing after a failed watch.
pub const WATCH_RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub type ErrorSender = mpsc::Sender<ProcessError>;

pub trait Processor: Send + Sync {
    fn run(&self) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

async fn render_blocking(
    renderer: &Arc<TemplateRenderer>,
    pairs: Vec<KvPair>,
) -> Result<RenderOutcome, ProcessError> {
    let renderer = Arc::clone(renderer);
    let dest = renderer.destination().to_path_buf();
    let joined = tokio::task::spawn_blocking(move || renderer.render(pairs)).await;
    match joined {
        Ok(Ok(outcome)) => {
            tracing::debug!(dest = %outcome.path().display(), outcome = ?outcome, "render complete");
            Ok(outcome)
        }
        Ok(Err(source)) => Err(ProcessError::Render { dest, source }),
        Err(err) => Err(ProcessError::Join {
            task: format!("render {}", dest.display()),
            detail: err.to_string(),
        }),
    }
}

async fn forward(errors: &ErrorSender, err: ProcessError) {
    if let Err(mpsc::error::SendError(err)) = errors.send(err).await {
        tracing::error!(error = %err, "error channel closed");
    }
}

// ---------------------------------------------------------------------------
// OnDemand
// ---------------------------------------------------------------------------

/// List the template's prefix once and render it.
pub struct OnDemand {
    renderer: Arc<TemplateRenderer>,
    store: Arc<dyn KvStore>,
}

impl OnDemand {
    pub fn new(renderer: Arc<TemplateRenderer>, store: Arc<dyn KvStore>) -> Self {
        OnDemand { renderer, store }
    }
}

impl Processor for OnDemand {
    fn run(&self) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let renderer = Arc::clone(&self.renderer);
        let store = Arc::clone(&self.store);
        async move {
            let dest = renderer.destination().to_path_buf();
            let prefix = renderer.spec().key_prefix.as_str().to_string();
            let listed = tokio::task::spawn_blocking(move || store.list(&prefix))
                .await
                .map_err(|err| ProcessError::Join {
                    task: format!("list for {}", dest.display()),
                    detail: err.to_string(),
                })?;
            let pairs = listed.map_err(|source| ProcessError::Store {
                dest: dest.clone(),
                source,
            })?;
            render_blocking(&renderer, pairs).await.map(|_| ())
        }
    }
}

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// Re-run `inner` every `interval` until stopped.
pub struct Interval<P> {
    inner: P,
    interval: Duration,
    stop: StopSignal,
    errors: ErrorSender,
}

impl<P: Processor> Interval<P> {
    pub fn new(inner: P, interval: Duration, stop: StopSignal, errors: ErrorSender) -> Self {
        Interval {
            inner,
            interval,
            stop,
            errors,
        }
    }
}

impl<P: Processor> Processor for Interval<P> {
    fn run(&self) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let mut stop = self.stop.clone();
        async move {
            loop {
                if let Err(err) = self.inner.run().await {
                    forward(&self.errors, err).await;
                }
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

/// Render every snapshot pushed by the store until stopped.
pub struct Watch {
    renderer: Arc<TemplateRenderer>,
    store: Arc<dyn KvStore>,
    stop: StopSignal,
    errors: ErrorSender,
    backoff: Duration,
}

impl Watch {
    pub fn new(
        renderer: Arc<TemplateRenderer>,
        store: Arc<dyn KvStore>,
        stop: StopSignal,
        errors: ErrorSender,
    ) -> Self {
        Watch {
            renderer,
            store,
            stop,
            errors,
            backoff: WATCH_RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn store_err(&self, source: StoreError) -> ProcessError {
        ProcessError::Store {
            dest: self.renderer.destination().to_path_buf(),
            source,
        }
    }
}

impl Processor for Watch {
    fn run(&self) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let mut stop = self.stop.clone();
        async move {
            let prefix = self.renderer.spec().key_prefix.as_str().to_string();
            loop {
                if stop.is_stopped() {
                    break;
                }
                match self.store.watch_tree(&prefix, stop.clone()) {
                    Ok(mut batches) => loop {
                        tokio::select! {
                            biased;
                            _ = stop.stopped() => return Ok(()),
                            batch = batches.recv() => match batch {
                                Some(Ok(pairs)) => {
                                    if let Err(err) = render_blocking(&self.renderer, pairs).await {
                                        forward(&self.errors, err).await;
                                    }
                                }
                                Some(Err(err)) => {
                                    forward(&self.errors, self.store_err(err)).await;
                                    break;
                                }
                                None => {
                                    let closed = StoreError::WatchClosed { prefix: prefix.clone() };
                                    forward(&self.errors, self.store_err(closed)).await;
                                    break;
                                }
                            },
                        }
                    },
                    Err(err) => forward(&self.errors, self.store_err(err)).await,
                }

                tracing::debug!(prefix = %prefix, backoff = ?self.backoff, "resubscribing after backoff");
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
            Ok(())
        }
    }
}
