use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    LocalMeasurements, LocalPcs, MeasurementProvider, PcsSink, PolledMeasurements,
    QueuedPcsSink, RetryPolicy, SimulatedGrid, SimulatedPcs,
};
use crate::config::HardwareConfig;
use crate::domain::Measurement;

/// Which provider/sink pair the daemon wires into the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    /// In-memory stubs; measurements stay at nominal until set
    Local,
    /// Polled grid simulator and a queued PCS writer task
    Simulated,
}

/// Provider and sink handed to the controller, plus their background tasks
pub struct Hardware {
    pub measurements: Arc<dyn MeasurementProvider>,
    pub pcs: Arc<dyn PcsSink>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Factory for the measurement provider and PCS sink
pub struct DeviceFactory {
    cfg: HardwareConfig,
}

impl DeviceFactory {
    pub fn new(cfg: HardwareConfig) -> Self {
        Self { cfg }
    }

    pub fn build(&self, shutdown: &CancellationToken) -> Result<Hardware> {
        match self.cfg.mode {
            HardwareMode::Local => Ok(Hardware {
                measurements: Arc::new(LocalMeasurements::new()),
                pcs: Arc::new(LocalPcs::new()),
                tasks: Vec::new(),
            }),
            HardwareMode::Simulated => {
                let polled = Arc::new(PolledMeasurements::new(Duration::from_millis(
                    self.cfg.measurement_max_age_ms,
                )));
                let grid = SimulatedGrid::new(
                    Measurement::nominal(),
                    self.cfg.sim_voltage_sigma_pu,
                    rand::random(),
                )?;
                let poller = polled.clone().spawn_poller(
                    Arc::new(grid),
                    Duration::from_millis(self.cfg.measurement_poll_ms.max(1)),
                    shutdown.clone(),
                );

                let retry = RetryPolicy {
                    attempts: self.cfg.pcs_retry_attempts,
                    backoff: Duration::from_millis(self.cfg.pcs_retry_backoff_ms),
                };
                let (sink, writer) = QueuedPcsSink::spawn(
                    Arc::new(SimulatedPcs::new(Duration::ZERO)),
                    retry,
                    shutdown.clone(),
                );
                tracing::info!(mode = ?self.cfg.mode, "hardware initialised");

                Ok(Hardware {
                    measurements: polled,
                    pcs: Arc::new(sink),
                    tasks: vec![poller, writer],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw_cfg(mode: HardwareMode) -> HardwareConfig {
        HardwareConfig {
            mode,
            measurement_poll_ms: 5,
            measurement_max_age_ms: 1000,
            pcs_retry_attempts: 2,
            pcs_retry_backoff_ms: 1,
            sim_voltage_sigma_pu: 0.001,
        }
    }

    #[tokio::test]
    async fn test_local_mode_has_no_tasks() {
        let hw = DeviceFactory::new(hw_cfg(HardwareMode::Local))
            .build(&CancellationToken::new())
            .unwrap();
        assert!(hw.tasks.is_empty());
        assert!(hw.measurements.get().grid_tied);
    }

    #[tokio::test]
    async fn test_simulated_mode_acquires_measurements() {
        let shutdown = CancellationToken::new();
        let hw = DeviceFactory::new(hw_cfg(HardwareMode::Simulated))
            .build(&shutdown)
            .unwrap();
        assert_eq!(hw.tasks.len(), 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(hw.measurements.get().grid_tied);

        hw.pcs.set_reactive_power(1.0);
        assert_eq!(hw.pcs.last_q(), 1.0);

        shutdown.cancel();
        for t in hw.tasks {
            t.await.unwrap();
        }
    }

    #[test]
    fn test_mode_deserialize() {
        let m: HardwareMode = serde_json::from_str("\"simulated\"").unwrap();
        assert_eq!(m, HardwareMode::Simulated);
    }
}
