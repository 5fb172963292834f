pub mod limits;
pub mod modes;
pub mod safety;
pub mod voltvar;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::domain::VoltVarConfig;
use crate::hardware::{DeviceFactory, Hardware};

pub use safety::{SafetyState, SafetyStateMachine};
pub use voltvar::{CommandError, Status, TickReport, VoltVarController};

/// Shared handle for the transport layer
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<VoltVarController>,
    pub site_config_path: PathBuf,
    /// Serializes persist-then-swap of config updates
    pub config_write: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(controller: Arc<VoltVarController>, site_config_path: PathBuf) -> Self {
        Self {
            controller,
            site_config_path,
            config_write: Arc::new(Mutex::new(())),
        }
    }
}

/// Build hardware and the controller from service + site configuration.
pub fn build(cfg: &Config, shutdown: &CancellationToken) -> Result<(AppState, Vec<JoinHandle<()>>)> {
    let site = VoltVarConfig::load_from_file(&cfg.controller.site_config_path).with_context(|| {
        format!(
            "failed to load site config {}",
            cfg.controller.site_config_path.display()
        )
    })?;

    let Hardware {
        measurements,
        pcs,
        tasks,
    } = DeviceFactory::new(cfg.hardware.clone()).build(shutdown)?;

    let controller = Arc::new(VoltVarController::new(
        site,
        measurements,
        pcs,
        cfg.controller.tick(),
    )?);

    Ok((
        AppState::new(controller, cfg.controller.site_config_path.clone()),
        tasks,
    ))
}

pub fn spawn_controller_tasks(state: &AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    let controller = state.controller.clone();
    tokio::spawn(async move {
        controller.run(shutdown).await;
    })
}

/// Wait for background tasks to finish, bounded by `grace`.
pub async fn join_with_grace(tasks: Vec<JoinHandle<()>>, grace: std::time::Duration) {
    let all = futures::future::join_all(tasks);
    match tokio::time::timeout(grace, all).await {
        Ok(results) => {
            for r in results {
                if let Err(e) = r {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
        Err(_) => warn!(grace_ms = grace.as_millis() as u64, "background tasks did not stop within grace period"),
    }
}
