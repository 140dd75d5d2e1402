use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use renderizr_core::{BackendConfig, ConfigError, GlobalConfig, TemplateSpec};
use renderizr_sync::TemplateRenderer;

use crate::error::{io_err, DaemonError, ProcessError};
use crate::processor::{Interval, OnDemand, Processor, Watch};
use crate::signal::{termination_signal, StopHandle};
use crate::store::{from_backend_config, KvStore};

/// Capacity of the processor error channel.
pub const ERROR_CHANNEL_CAPACITY: usize = 10;

/// Logging settings applied by [`start_blocking`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Owns the templates and drives their processors.
pub struct Coordinator {
    config: GlobalConfig,
    renderers: Vec<Arc<TemplateRenderer>>,
    store: Arc<dyn KvStore>,
}

impl Coordinator {
    pub fn new(
        config: GlobalConfig,
        templates: Vec<TemplateSpec>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, ConfigError> {
        if templates.is_empty() {
            return Err(ConfigError::NoTemplates);
        }
        let wants_watch = templates.iter().any(|t| t.effective_watch(config.watch));
        if !config.onetime && wants_watch && !store.supports_watch() {
            return Err(ConfigError::WatchUnsupported {
                backend: store.kind().to_string(),
            });
        }

        let renderers = templates
            .into_iter()
            .map(|spec| Arc::new(TemplateRenderer::new(spec, config.noop)))
            .collect();
        Ok(Coordinator {
            config,
            renderers,
            store,
        })
    }

    /// Parse templates from `config`, build the store client and validate.
    pub fn from_config(config: GlobalConfig, backend: &BackendConfig) -> Result<Self, ConfigError> {
        backend.validate()?;
        let templates = config.template_specs()?;
        log_effective_config(&config, backend, &templates);
        Self::new(config, templates, from_backend_config(backend))
    }

    pub fn templates(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.renderers.iter().map(|r| r.spec())
    }

    /// Render every template once, in order. Every failure is logged; the
    /// first one is returned.
    pub async fn run_once(&self) -> Result<(), DaemonError> {
        let mut first: Option<ProcessError> = None;
        for renderer in &self.renderers {
            let processor = OnDemand::new(Arc::clone(renderer), Arc::clone(&self.store));
            if let Err(err) = processor.run().await {
                tracing::error!(error = %err, "render failed");
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Run every processor until `shutdown` resolves and all of them have
    /// observed the stop signal.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let stop = StopHandle::new();
        let (err_tx, mut err_rx) = mpsc::channel::<ProcessError>(ERROR_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();

        for renderer in &self.renderers {
            let dest = renderer.destination().display().to_string();
            let interval = Interval::new(
                OnDemand::new(Arc::clone(renderer), Arc::clone(&self.store)),
                self.config.resync_interval,
                stop.subscribe(),
                err_tx.clone(),
            );
            tasks.spawn(async move { (format!("interval {dest}"), interval.run().await) });

            if renderer.spec().effective_watch(self.config.watch) {
                let dest = renderer.destination().display().to_string();
                let watch = Watch::new(
                    Arc::clone(renderer),
                    Arc::clone(&self.store),
                    stop.subscribe(),
                    err_tx.clone(),
                );
                tasks.spawn(async move { (format!("watch {dest}"), watch.run().await) });
            }
        }
        drop(err_tx);
        tracing::info!(processors = tasks.len(), "processors started");

        tokio::pin!(shutdown);
        let mut stopping = false;
        loop {
            tokio::select! {
                Some(err) = err_rx.recv() => tracing::error!(error = %err, "processor error"),
                _ = &mut shutdown, if !stopping => {
                    stopping = true;
                    tracing::info!("shutting down");
                    stop.trigger();
                }
                joined = tasks.join_next() => match joined {
                    Some(result) => handle_join(result),
                    None => break,
                },
            }
        }

        while let Ok(err) = err_rx.try_recv() {
            tracing::error!(error = %err, "processor error");
        }
        tracing::info!("all processors stopped");
        Ok(())
    }
}

fn handle_join(
    result: Result<(String, Result<(), ProcessError>), tokio::task::JoinError>,
) {
    match result {
        Ok((task, Ok(()))) => tracing::debug!(task = %task, "processor done"),
        Ok((task, Err(err))) => tracing::error!(task = %task, error = %err, "processor failed"),
        Err(err) => tracing::error!(error = %err, "processor task join failure"),
    }
}

fn log_effective_config(config: &GlobalConfig, backend: &BackendConfig, templates: &[TemplateSpec]) {
    tracing::info!(
        backend = %backend.kind(),
        prefix = %config.prefix,
        onetime = config.onetime,
        watch = config.watch,
        resync_interval = ?config.resync_interval,
        noop = config.noop,
        templates = templates.len(),
        "effective configuration",
    );
    for t in templates {
        tracing::info!(
            src = %t.source.display(),
            dest = %t.destination.display(),
            prefix = %t.key_prefix,
            owner = ?t.owner.map(|o| o.to_string()),
            mode = ?t.mode.map(|m| m.to_string()),
            check_cmd = ?t.check_command,
            reload_cmd = ?t.reload_command,
            keep_stage_file = t.keep_staged_file,
            watch = t.effective_watch(config.watch),
            "template",
        );
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Install tracing once. `RUST_LOG` wins over `level`.
pub fn init_tracing(log: &LogConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    if log.json {
        let _ = fmt().json().with_env_filter(filter).with_target(false).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

/// Build the runtime and run one-shot or daemon mode to completion.
///
/// Daemon mode stops on SIGINT or SIGTERM.
pub fn start_blocking(
    config: GlobalConfig,
    backend: &BackendConfig,
    log: &LogConfig,
) -> Result<(), DaemonError> {
    init_tracing(log);
    let coordinator = Coordinator::from_config(config, backend)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async {
        if coordinator.config.onetime {
            return coordinator.run_once().await;
        }
        let shutdown = termination_signal()?;
        coordinator.run_until(shutdown).await
    })
}
