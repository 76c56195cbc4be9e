use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use filter_service::api::{ApiServer, AppState};
use filter_service::config::ServiceConfig;
use filter_service::pipeline::PipelineManager;
use filter_service::scratch::ScratchSpace;
use filter_service::{logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env().context("loading configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(config.log_dir.as_deref()).context("initializing logging")?;
    panic_hook::install(config.log_dir.as_deref());

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.child_token());

    let scratch = ScratchSpace::new(&config.scratch_dir);
    scratch.init().await.context("initializing scratch space")?;
    let stale = scratch.cleanup_all().await?;
    if stale > 0 {
        warn!(count = stale, "Removed scratch directories left by a previous run");
    }

    let manager = Arc::new(
        PipelineManager::new(config.pipeline.clone(), scratch.clone())
            .context("building pipeline")?,
    );
    manager.start();

    let state = AppState::new(manager.clone(), config.api.body_limit)
        .with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state);

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    info!(
        workers = config.pipeline.worker_pool.max_workers,
        scratch = %config.scratch_dir.display(),
        "filter-service started"
    );

    let served = server.run().await;
    if let Err(e) = &served {
        error!(error = %e, "API server stopped with an error");
    }

    manager.stop().await;
    background.cancel();

    match scratch.cleanup_all().await {
        Ok(count) => info!(count, "Scratch space cleaned up"),
        Err(e) => error!(error = %e, "Failed to clean up scratch space"),
    }

    info!("filter-service stopped");
    served.map_err(Into::into)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
