use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for the experiment-control server: listen
/// addresses for the RPC and event transports, the RDB arena size, and the
/// snapshot file used to persist the KV store across restarts.
#[derive(Debug, Clone, Parser)]
#[command(name = "bp-server", version, about = "Experiment-control middleware server")]
pub struct ServerConfig {
    /// Address the RPC transport listens on.
    #[arg(long, default_value = "0.0.0.0:5100")]
    pub rpc_addr: String,

    /// Address the event bus transport listens on.
    #[arg(long, default_value = "0.0.0.0:5101")]
    pub evt_addr: String,

    /// RDB arena capacity in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub arena_capacity: u64,

    /// Snapshot file to restore from at startup and save to at shutdown.
    #[arg(long, default_value = "bp-rdb.snapshot")]
    pub snapshot_path: PathBuf,

    /// Skips loading and saving the snapshot entirely.
    #[arg(long)]
    pub no_snapshot: bool,

    /// Interval, in seconds, between `/system/rdb/statistics/*` samples.
    #[arg(long, default_value_t = 5)]
    pub stats_interval_secs: u64,

    /// Log level used when `RUST_LOG` is not set (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
