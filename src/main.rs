use anyhow::Result;
use futures::future::join_all;
use netznoe_smartmeter::{api, config::Config, sync::AppState, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;

    if cfg.auth.token.is_empty() {
        warn!("HTTP API authentication is disabled; set NETZNOE__AUTH__TOKEN to enable it");
    }

    let app_state = AppState::new(cfg.clone()).await?;
    let app = api::router(app_state.clone(), &cfg);
    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0, the API is reachable from the network");
    }

    let token = CancellationToken::new();
    let tasks = app_state.scheduler.clone().start(token.clone());

    info!(%addr, "starting Netz NO smartmeter sync");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    token.cancel();
    for result in join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "sync task ended abnormally");
        }
    }
    app_state.store.close().await;

    warn!("shutdown complete");
    Ok(())
}
