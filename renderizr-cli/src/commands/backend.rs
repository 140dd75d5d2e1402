//! Backend subcommands and their flags.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use renderizr_core::config::DEFAULT_FS_MAX_FILE_SIZE;
use renderizr_core::BackendConfig;

#[derive(Subcommand, Debug)]
pub enum BackendCommand {
    /// Read keys from the Consul KV HTTP API.
    Consul(ConsulArgs),

    /// Read keys from the etcd v2 HTTP API.
    Etcd(EtcdArgs),

    /// Read keys from ZooKeeper znodes.
    #[command(name = "zk", alias = "zookeeper")]
    Zookeeper(ZookeeperArgs),

    /// Read keys from files below a directory. Watch is not supported.
    Fs(FsArgs),
}

#[derive(Args, Debug)]
pub struct ConsulArgs {
    /// Agent address; repeat to fail over between agents.
    #[arg(
        long = "endpoint",
        env = "RENDERIZR_CONSUL_ENDPOINT",
        value_delimiter = ',',
        default_value = "127.0.0.1:8500"
    )]
    pub endpoints: Vec<String>,

    #[arg(long, env = "RENDERIZR_CONSUL_SCHEME", default_value = "http", value_parser = ["http", "https"])]
    pub scheme: String,

    /// ACL token sent as `X-Consul-Token`.
    #[arg(long, env = "RENDERIZR_CONSUL_TOKEN")]
    pub token: Option<String>,
}

#[derive(Args, Debug)]
pub struct EtcdArgs {
    /// Cluster member address; repeat to fail over between members.
    #[arg(
        long = "endpoint",
        env = "RENDERIZR_ETCD_ENDPOINT",
        value_delimiter = ',',
        default_value = "127.0.0.1:2379"
    )]
    pub endpoints: Vec<String>,

    #[arg(long, env = "RENDERIZR_ETCD_SCHEME", default_value = "http", value_parser = ["http", "https"])]
    pub scheme: String,
}

#[derive(Args, Debug)]
pub struct ZookeeperArgs {
    /// Ensemble member address; repeat to list every member.
    #[arg(
        long = "endpoint",
        env = "RENDERIZR_ZK_ENDPOINT",
        value_delimiter = ',',
        default_value = "127.0.0.1:2181"
    )]
    pub endpoints: Vec<String>,
}

#[derive(Args, Debug)]
pub struct FsArgs {
    /// Directory whose files are the keys.
    #[arg(long, env = "RENDERIZR_FS_ROOT")]
    pub root: PathBuf,

    /// Files larger than this many bytes are skipped.
    #[arg(long, env = "RENDERIZR_FS_MAX_FILE_SIZE", default_value_t = DEFAULT_FS_MAX_FILE_SIZE)]
    pub max_file_size: u64,
}

impl From<BackendCommand> for BackendConfig {
    fn from(cmd: BackendCommand) -> Self {
        match cmd {
            BackendCommand::Consul(args) => BackendConfig::Consul {
                endpoints: args.endpoints,
                scheme: args.scheme,
                token: args.token.filter(|t| !t.is_empty()),
            },
            BackendCommand::Etcd(args) => BackendConfig::Etcd {
                endpoints: args.endpoints,
                scheme: args.scheme,
            },
            BackendCommand::Zookeeper(args) => BackendConfig::Zookeeper {
                endpoints: args.endpoints,
            },
            BackendCommand::Fs(args) => BackendConfig::Fs {
                root: args.root,
                max_file_size: args.max_file_size,
            },
        }
    }
}
