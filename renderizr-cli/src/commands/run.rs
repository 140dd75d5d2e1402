//! Global flags and the single run path shared by every backend.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use renderizr_core::{BackendConfig, GlobalConfig, KeyPrefix};
use renderizr_daemon::LogConfig;

use super::backend::BackendCommand;

/// Flags accepted before the backend subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Key prefix prepended to every template's prefix.
    #[arg(long, env = "RENDERIZR_PREFIX", default_value = "/")]
    pub prefix: String,

    /// Template record `src;dest;owner;mode;check_cmd;reload_cmd`. Repeatable.
    #[arg(long = "template", env = "RENDERIZR_TEMPLATE")]
    pub templates: Vec<String>,

    /// YAML file with additional templates.
    #[arg(long, env = "RENDERIZR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Render every template once and exit.
    #[arg(long, env = "RENDERIZR_ONETIME")]
    pub onetime: bool,

    /// Also re-render whenever the store reports a change.
    #[arg(long, env = "RENDERIZR_WATCH")]
    pub watch: bool,

    /// Time between full re-renders in daemon mode, e.g. `30s` or `5m`.
    #[arg(long, env = "RENDERIZR_RESYNC_INTERVAL", default_value = "60s")]
    pub resync_interval: humantime::Duration,

    /// Log the pending diff instead of writing destinations.
    #[arg(long, env = "RENDERIZR_NOOP")]
    pub noop: bool,

    /// Keep staged files next to their destinations.
    #[arg(long, env = "RENDERIZR_KEEP_STAGE_FILE")]
    pub keep_stage_file: bool,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, env = "RENDERIZR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RENDERIZR_LOG_JSON")]
    pub log_json: bool,
}

impl GlobalArgs {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    fn into_config(self) -> GlobalConfig {
        GlobalConfig {
            prefix: KeyPrefix::new(&self.prefix),
            templates: self.templates,
            config_file: self.config,
            onetime: self.onetime,
            watch: self.watch,
            resync_interval: self.resync_interval.into(),
            noop: self.noop,
            keep_staged_file: self.keep_stage_file,
        }
    }
}

pub fn run(global: GlobalArgs, backend: BackendCommand) -> Result<()> {
    let log = global.log_config();
    let config = global.into_config();
    let onetime = config.onetime;
    let backend = BackendConfig::from(backend);
    let kind = backend.kind();

    renderizr_daemon::start_blocking(config, &backend, &log).with_context(|| {
        if onetime {
            format!("one-shot render against {kind} failed")
        } else {
            format!("renderizr daemon against {kind} failed")
        }
    })
}
