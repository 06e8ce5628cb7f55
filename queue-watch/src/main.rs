use anyhow::Context;
use queue_watch::acquisition::{FailoverController, build_upstream};
use queue_watch::api::{ApiServer, AppState};
use queue_watch::config::AppConfig;
use queue_watch::logging;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logging first, so warnings about invalid configuration are not lost.
    let logging = logging::init_logging(AppConfig::log_dir_from_env().as_deref())?;
    let config = AppConfig::from_env_or_default();

    let cancel_token = CancellationToken::new();
    logging.start_retention_cleanup(cancel_token.clone());

    let acquisition = config.acquisition.clone();
    let (stream, page) = build_upstream(&acquisition)?;
    let (controller, handle) =
        FailoverController::new(stream, page, acquisition.clone(), cancel_token.child_token());

    let state = AppState::new(controller.store_reader(), controller.connection_reader())
        .with_controller(handle)
        .with_budgets(
            acquisition.stream_retry_budget,
            acquisition.scrape_retry_budget,
        )
        .with_retry_timeout(acquisition.manual_retry_timeout());

    let server = ApiServer::new(config.api.clone(), state, cancel_token.clone());
    let listener = server
        .bind()
        .await
        .context("failed to bind the API listener")?;

    let controller_task = tokio::spawn(controller.run());

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    info!(version = env!("CARGO_PKG_VERSION"), "queue-watch started");

    let served = server.serve(listener).await;
    cancel_token.cancel();
    if let Err(e) = controller_task.await {
        error!(error = %e, "Acquisition controller task failed");
    }

    served?;
    info!("queue-watch stopped");
    Ok(())
}
