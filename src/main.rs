use anyhow::Result;
use bess_voltvar::{api, config::Config, controller, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let shutdown = CancellationToken::new();

    let (app_state, mut tasks) = controller::build(&cfg, &shutdown)?;
    let app = api::router(app_state.clone(), &cfg.server);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0 - the command surface is reachable from the network");
    }
    info!(%addr, site_config = %cfg.controller.site_config_path.display(), "starting voltvard");

    tasks.push(controller::spawn_controller_tasks(&app_state, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await;

    shutdown.cancel();
    controller::join_with_grace(tasks, cfg.controller.shutdown_grace()).await;

    warn!("shutdown complete");
    served?;
    Ok(())
}
