use std::{
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use cmd_util::env::config_tool;
use db_connection::{
    ClusterPool,
    ClusterPoolConfig,
};
use restore::{
    catalog,
    restore_postdata,
    Restorer,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

mod config;

fn main() -> ExitCode {
    let config = Config::parse();
    let _guard = config_tool(config.log_file.as_deref());
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Could not start runtime: {e}");
            return ExitCode::FAILURE;
        },
    };
    match runtime.block_on(run(config)) {
        Ok(num_errors) => {
            if num_errors > 0 {
                tracing::warn!("Metadata restore completed with {num_errors} recovered errors");
            } else {
                tracing::info!("Metadata restore completed");
            }
            ExitCode::SUCCESS
        },
        Err(err) => {
            println!();
            tracing::error!("Fatal error during metadata restore: {err:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: Config) -> anyhow::Result<u32> {
    tracing::info!("Starting metadata restore");

    // The engine never installs signal handlers; it only polls this token at
    // the top of each worker's per-statement loop.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C; finishing in-flight statements and stopping");
            ctrl_c_cancel.cancel();
        }
    });

    let pool = Arc::new(
        ClusterPool::connect(&ClusterPoolConfig {
            url: config.dsn.clone(),
            num_conns: config.jobs,
            require_ssl: config.require_ssl,
        })
        .await?,
    );
    let parallel = config.jobs > 1;
    let show_progress = !config.no_progress;
    let restorer = Restorer::new(pool, config.on_error_continue, cancel.clone());

    let num_errors = match &config.write_to {
        Some(path) => {
            let statements = catalog::read_offset_statements(&config.catalog)?;
            restorer
                .write_statements_with_progress(
                    statements,
                    "Postdata statements written",
                    show_progress,
                    parallel,
                    path,
                )
                .await?
        },
        None => {
            let statements = catalog::read_statements(&config.catalog)?;
            restore_postdata(
                &restorer,
                statements,
                config.skip_indexes,
                parallel,
                show_progress,
            )
            .await?
        },
    };
    if cancel.is_cancelled() {
        tracing::warn!("Restore stopped early at operator request");
    }
    Ok(num_errors)
}
