use std::path::PathBuf;

use clap::Parser;

/// Replays a captured postdata DDL catalog against a segmented cluster, or
/// writes it into an offset-addressed plan file.
#[derive(Parser, Clone, Debug)]
#[command(name = "segrestore", version)]
pub struct Config {
    /// Connection url for the cluster coordinator, e.g.
    /// postgres://gpadmin@coordinator:5432/postgres.
    #[arg(long, env = "SEGRESTORE_DSN")]
    pub dsn: String,

    /// Newline-delimited JSON statement catalog to replay.
    #[arg(long)]
    pub catalog: PathBuf,

    /// Number of cluster sessions, and therefore of parallel workers. 1 runs
    /// the serial path.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Count and log per-statement failures instead of stopping the run at
    /// the first one.
    #[arg(long)]
    pub on_error_continue: bool,

    /// Defer index creation: route all index statements into their own batch
    /// and do not execute it.
    #[arg(long)]
    pub skip_indexes: bool,

    /// Write statements into this plan file at their recorded byte offsets
    /// instead of executing them. The catalog must carry offsets.
    #[arg(long)]
    pub write_to: Option<PathBuf>,

    /// Append a debug-level restore log (including per-statement failure
    /// detail) to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Suppress progress reporting.
    #[arg(long)]
    pub no_progress: bool,

    /// Require TLS for cluster sessions.
    #[arg(long)]
    pub require_ssl: bool,
}
