//! renderizr: render configuration files from a key/value store.
//!
//! # Usage
//!
//! ```text
//! renderizr [GLOBAL] consul [--endpoint <host:port>]... [--scheme http|https] [--token <t>]
//! renderizr [GLOBAL] etcd   [--endpoint <host:port>]... [--scheme http|https]
//! renderizr [GLOBAL] zk     [--endpoint <host:port>]...
//! renderizr [GLOBAL] fs     --root <dir> [--max-file-size <bytes>]
//! ```
//!
//! Every flag can also be set from the environment: `RENDERIZR_<FLAG>` for
//! global flags, `RENDERIZR_<BACKEND>_<FLAG>` for backend flags.

mod commands;

use anyhow::Result;
use clap::Parser;

use commands::{backend::BackendCommand, run::GlobalArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "renderizr",
    version,
    about = "Render configuration files from Consul, etcd, ZooKeeper or a directory tree",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Key/value store to read from.
    #[command(subcommand)]
    backend: BackendCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::run::run(cli.global, cli.backend)
}
