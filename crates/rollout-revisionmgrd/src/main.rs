//! revisionmgrd - revision controller daemon
//!
//! Publishes a new revision of the tracked ConfigMaps and Secrets whenever
//! they drift from the latest one.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rollout_common::{InMemoryStatusClient, InMemoryStore, ObjectStore, StatusClient};
use rollout_revisionmgrd::{init_logging, Args, Backend, ControllerConfig, RevisionController};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format);

    info!("--- Starting revisionmgrd ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("revisionmgrd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ControllerConfig::resolve(&args).context("invalid configuration")?;
    let (store, status) = connect(&args, &config).await?;

    let controller = Arc::new(
        RevisionController::new(
            config.namespace.clone(),
            config.config_maps.clone(),
            config.secrets.clone(),
            store,
            status,
        )
        .with_rate_limiter(config.queue),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_cancel.cancel();
    });

    controller.run(config.workers, cancel).await;
    info!("revisionmgrd exiting");
    Ok(())
}

async fn connect(
    args: &Args,
    config: &ControllerConfig,
) -> anyhow::Result<(Arc<dyn ObjectStore>, Arc<dyn StatusClient>)> {
    match args.backend {
        Backend::Memory => {
            warn!("Using in-memory backend; state is lost on exit");
            Ok((
                Arc::new(InMemoryStore::new()),
                Arc::new(InMemoryStatusClient::default()),
            ))
        }
        #[cfg(feature = "redis")]
        Backend::Redis => {
            use rollout_common::redis_backend::{RedisConfig, RedisStatusClient, RedisStore};

            let redis = RedisConfig::new(args.redis_host.clone(), args.redis_port, args.redis_db);
            let store = RedisStore::connect(&redis)
                .await
                .context("failed to connect object store")?
                .with_poll_interval(config.poll_interval);
            let status = RedisStatusClient::connect(&redis, &config.namespace)
                .await
                .context("failed to connect status client")?
                .with_poll_interval(config.poll_interval);
            Ok((Arc::new(store), Arc::new(status)))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis => {
            let _ = config;
            anyhow::bail!("revisionmgrd was built without the redis feature")
        }
    }
}
