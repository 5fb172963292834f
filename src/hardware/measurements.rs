use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::Measurement;

/// Synchronous snapshot supplier consumed by the control tick.
///
/// Implementations must return promptly and never fail: when fresh data is
/// unavailable they return the last-known-good snapshot or a snapshot with
/// `grid_tied = false`.
pub trait MeasurementProvider: Send + Sync {
    fn get(&self) -> Measurement;
}

/// In-memory provider for tests and bench setups
#[derive(Debug, Default)]
pub struct LocalMeasurements {
    val: RwLock<Measurement>,
}

impl LocalMeasurements {
    pub fn new() -> Self {
        Self::with_value(Measurement::nominal())
    }

    pub fn with_value(m: Measurement) -> Self {
        Self {
            val: RwLock::new(m),
        }
    }

    pub fn set(&self, m: Measurement) {
        *self.val.write() = m;
    }
}

impl MeasurementProvider for LocalMeasurements {
    fn get(&self) -> Measurement {
        *self.val.read()
    }
}

/// Asynchronous acquisition backend (meter, RTU, simulator)
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    async fn read(&self) -> Result<Measurement>;
}

/// Provider backed by a background poller.
///
/// `get()` only reads the cached snapshot. If the cache is older than
/// `max_age`, or nothing was ever acquired, the snapshot is reported with
/// `grid_tied = false` so the controller ramps the command to zero.
pub struct PolledMeasurements {
    latest: RwLock<Option<(Measurement, Instant)>>,
    max_age: Duration,
}

impl PolledMeasurements {
    pub fn new(max_age: Duration) -> Self {
        Self {
            latest: RwLock::new(None),
            max_age,
        }
    }

    pub fn record(&self, m: Measurement, at: Instant) {
        *self.latest.write() = Some((m, at));
    }

    pub fn get_at(&self, now: Instant) -> Measurement {
        match *self.latest.read() {
            Some((m, at)) if now.saturating_duration_since(at) <= self.max_age => m,
            Some((m, _)) => Measurement {
                grid_tied: false,
                ..m
            },
            None => Measurement {
                grid_tied: false,
                ..Measurement::nominal()
            },
        }
    }

    /// Poll `source` every `period` until `shutdown` fires.
    pub fn spawn_poller(
        self: Arc<Self>,
        source: Arc<dyn MeasurementSource>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures: u32 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match source.read().await {
                    Ok(m) => {
                        if failures > 0 {
                            info!(failures, "measurement acquisition recovered");
                        }
                        failures = 0;
                        self.record(m, Instant::now());
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(error = %e, failures, "measurement acquisition failed, serving last known value");
                    }
                }
            }
            debug!("measurement poller stopped");
        })
    }
}

impl MeasurementProvider for PolledMeasurements {
    fn get(&self) -> Measurement {
        self.get_at(Instant::now())
    }
}

/// Simulated interconnection point: nominal voltage with Gaussian noise.
pub struct SimulatedGrid {
    base: Measurement,
    noise: Normal<f64>,
    rng: Mutex<StdRng>,
}

impl SimulatedGrid {
    /// `v_sigma_pu` is the voltage noise standard deviation in per-unit.
    pub fn new(base: Measurement, v_sigma_pu: f64, seed: u64) -> Result<Self> {
        let noise = Normal::new(0.0, v_sigma_pu.abs())?;
        Ok(Self {
            base,
            noise,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }
}

#[async_trait]
impl MeasurementSource for SimulatedGrid {
    async fn read(&self) -> Result<Measurement> {
        let dv_pu = self.noise.sample(&mut *self.rng.lock());
        Ok(Measurement {
            v_pcc_kv: self.base.v_nom_kv * (self.base.v_pu() + dv_pu),
            ..self.base
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_set_get() {
        let local = LocalMeasurements::new();
        assert!(local.get().grid_tied);
        local.set(Measurement {
            p_mw: 4.0,
            ..Measurement::nominal()
        });
        assert_eq!(local.get().p_mw, 4.0);
    }

    #[test]
    fn test_polled_without_data_is_not_grid_tied() {
        let polled = PolledMeasurements::new(Duration::from_millis(500));
        assert!(!polled.get_at(Instant::now()).grid_tied);
    }

    #[test]
    fn test_polled_fresh_and_stale() {
        let polled = PolledMeasurements::new(Duration::from_millis(500));
        let t0 = Instant::now();
        let m = Measurement {
            p_mw: 3.0,
            ..Measurement::nominal()
        };
        polled.record(m, t0);

        let fresh = polled.get_at(t0 + Duration::from_millis(500));
        assert_eq!(fresh, m);

        let stale = polled.get_at(t0 + Duration::from_millis(501));
        assert!(!stale.grid_tied);
        assert_eq!(stale.p_mw, 3.0);
    }

    struct FlakySource;

    #[async_trait]
    impl MeasurementSource for FlakySource {
        async fn read(&self) -> Result<Measurement> {
            anyhow::bail!("meter offline")
        }
    }

    #[tokio::test]
    async fn test_poller_keeps_last_good_on_failure() {
        let polled = Arc::new(PolledMeasurements::new(Duration::from_secs(60)));
        let good = Measurement {
            v_pcc_kv: 14.0,
            ..Measurement::nominal()
        };
        polled.record(good, Instant::now());

        let shutdown = CancellationToken::new();
        let handle = polled.clone().spawn_poller(
            Arc::new(FlakySource),
            Duration::from_millis(5),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(polled.get(), good);
    }

    #[tokio::test]
    async fn test_simulated_grid_near_nominal() {
        let grid = SimulatedGrid::new(Measurement::nominal(), 0.005, 7).unwrap();
        for _ in 0..50 {
            let m = grid.read().await.unwrap();
            assert!((m.v_pu() - 1.0).abs() < 0.05);
            assert!(m.grid_tied);
        }
    }
}
