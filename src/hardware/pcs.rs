use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Reactive power command sink, fire-and-forget from the tick's side.
pub trait PcsSink: Send + Sync {
    /// Must not block the caller.
    fn set_reactive_power(&self, q_mvar: f64);
    /// Last command accepted by the sink.
    fn last_q(&self) -> f64;
}

/// Lock-free f64 cell
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

/// In-memory sink that only records the command
#[derive(Debug, Default)]
pub struct LocalPcs {
    last_q: AtomicF64,
}

impl LocalPcs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PcsSink for LocalPcs {
    fn set_reactive_power(&self, q_mvar: f64) {
        self.last_q.store(q_mvar);
        debug!(q_set_mvar = q_mvar, "PCS command");
    }

    fn last_q(&self) -> f64 {
        self.last_q.load()
    }
}

/// Physical actuator behind a [`QueuedPcsSink`]; may block or fail.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PcsActuator: Send + Sync {
    async fn write_reactive_power(&self, q_mvar: f64) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Sink that hands the newest command to a writer task.
///
/// Only the latest value matters, so commands are published on a `watch`
/// channel: a slow actuator sees intermediate values coalesced rather than
/// queued.
pub struct QueuedPcsSink {
    last_q: AtomicF64,
    tx: watch::Sender<f64>,
}

impl QueuedPcsSink {
    pub fn spawn(
        actuator: Arc<dyn PcsActuator>,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(0.0);
        let handle = tokio::spawn(writer_loop(actuator, rx, retry, shutdown));
        (
            Self {
                last_q: AtomicF64::new(0.0),
                tx,
            },
            handle,
        )
    }
}

impl PcsSink for QueuedPcsSink {
    fn set_reactive_power(&self, q_mvar: f64) {
        self.last_q.store(q_mvar);
        self.tx.send_replace(q_mvar);
    }

    fn last_q(&self) -> f64 {
        self.last_q.load()
    }
}

async fn writer_loop(
    actuator: Arc<dyn PcsActuator>,
    mut rx: watch::Receiver<f64>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let q = *rx.borrow_and_update();
        write_with_retry(actuator.as_ref(), &rx, q, retry).await;
    }
    debug!("PCS writer stopped");
}

async fn write_with_retry(
    actuator: &dyn PcsActuator,
    rx: &watch::Receiver<f64>,
    q_mvar: f64,
    retry: RetryPolicy,
) {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        match actuator.write_reactive_power(q_mvar).await {
            Ok(()) => return,
            Err(e) if attempt < attempts => {
                warn!(error = %e, attempt, q_set_mvar = q_mvar, "PCS write failed, retrying");
                // a newer command supersedes this one
                if rx.has_changed().unwrap_or(false) {
                    return;
                }
                tokio::time::sleep(retry.backoff * attempt).await;
            }
            Err(e) => {
                error!(error = %e, attempts, q_set_mvar = q_mvar, "PCS write failed, giving up");
            }
        }
    }
}

/// Simulated inverter: accepts every write after an optional latency.
///
/// Keeps only the last applied value and a write counter.
#[derive(Debug, Default)]
pub struct SimulatedPcs {
    applied: AtomicF64,
    writes: AtomicU64,
    latency: Duration,
}

impl SimulatedPcs {
    pub fn new(latency: Duration) -> Self {
        Self {
            applied: AtomicF64::new(0.0),
            writes: AtomicU64::new(0),
            latency,
        }
    }

    /// Last value written to the simulated inverter, if any
    pub fn last_applied(&self) -> Option<f64> {
        (self.writes() > 0).then(|| self.applied.load())
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PcsActuator for SimulatedPcs {
    async fn write_reactive_power(&self, q_mvar: f64) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.applied.store(q_mvar);
        self.writes.fetch_add(1, Ordering::AcqRel);
        debug!(q_set_mvar = q_mvar, "simulated PCS applied command");
        Ok(())
    }
}
