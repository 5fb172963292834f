//! Reactive power control loop.
//!
//! All mutable controller state sits behind one reader-writer lock: the tick
//! and every command setter take it exclusively, status reads take it
//! shared. A tick therefore always sees one configuration value from start
//! to finish.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::limits::{
    apply_interlocks, capability_cap, clamp_to_capability, effective_derate, ramp_limit,
};
use super::modes;
use super::safety::{SafetyState, SafetyStateMachine};
use crate::domain::{ConfigError, Measurement, Mode, VoltVarConfig};
use crate::hardware::{MeasurementProvider, PcsSink};

/// Rejected runtime commands. No controller state changes on rejection.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid mode: {0}")]
    UnknownMode(String),
    #[error("remote setpoint must be finite, got {0}")]
    InvalidSetpoint(f64),
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Externally readable controller snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub mode: Mode,
    /// Mode used by the last tick, after remote-timeout fallback
    pub effective_mode: Mode,
    pub safety_state: SafetyState,
    /// Filtered per-unit voltage; `None` before the first tick
    pub v_pu: Option<f64>,
    pub q_set_mvar: f64,
    pub q_cap_mvar: f64,
    pub clamped: bool,
    /// Thermal derate as the tick applies it, clamped to [0, 1]
    pub derate: f64,
    pub grid_tied: bool,
    pub tick_interval_ms: u64,
    pub pcs_last_q_mvar: f64,
    pub remote_q_mvar: f64,
    /// Recorded with the last remote setpoint; staleness uses
    /// `fallbacks.remote_timeout_s` only
    pub remote_ttl_s: Option<f64>,
    pub voltage_kv: f64,
    pub frequency_hz: f64,
    pub active_power_mw: f64,
    pub timestamp: DateTime<Utc>,
}

/// What one tick computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub mode: Mode,
    pub v_pu: f64,
    pub q_star_mvar: f64,
    pub q_cap_mvar: f64,
    pub clamped: bool,
    pub q_cmd_mvar: f64,
}

struct ControllerState {
    cfg: Arc<VoltVarConfig>,
    safety: SafetyStateMachine,
    v_filt: Option<f64>,
    q_cmd: f64,
    clamped: bool,
    effective_mode: Mode,
    in_fallback: bool,
    last_tick: Option<Instant>,
    remote_q: f64,
    remote_ts: Option<Instant>,
    remote_ttl: Option<Duration>,
}

pub struct VoltVarController {
    state: RwLock<ControllerState>,
    meas: Arc<dyn MeasurementProvider>,
    pcs: Arc<dyn PcsSink>,
    tick: Duration,
}

impl VoltVarController {
    pub fn new(
        cfg: VoltVarConfig,
        meas: Arc<dyn MeasurementProvider>,
        pcs: Arc<dyn PcsSink>,
        tick: Duration,
    ) -> Result<Self, ConfigError> {
        if tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        cfg.validate()?;
        let mode = cfg.mode;
        Ok(Self {
            state: RwLock::new(ControllerState {
                cfg: Arc::new(cfg),
                safety: SafetyStateMachine::new(),
                v_filt: None,
                q_cmd: 0.0,
                clamped: false,
                effective_mode: mode,
                in_fallback: false,
                last_tick: None,
                remote_q: 0.0,
                remote_ts: None,
                remote_ttl: None,
            }),
            meas,
            pcs,
            tick,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Drive the tick at the configured period until `shutdown` fires.
    ///
    /// Overrunning ticks are not caught up. A tick in progress always
    /// completes before the loop observes cancellation.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state.write().safety.arm();
        info!(tick_ms = self.tick.as_millis() as u64, "control loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.state.write().safety.disable();
        info!("control loop stopped");
    }

    pub fn tick(&self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// One control step at `now`. Never fails; every call commits exactly
    /// one command to the PCS sink.
    pub fn tick_at(&self, now: Instant) -> TickReport {
        let mut st = self.state.write();
        let cfg = Arc::clone(&st.cfg);
        let dt = self.tick.as_secs_f64();

        let me = self.meas.get();

        let target = me.v_pu();
        if target.is_finite() {
            st.v_filt = Some(match st.v_filt {
                None => target,
                Some(v) => {
                    let alpha = dt / (cfg.limits.v_lpf_tau_s + dt);
                    v + alpha * (target - v)
                }
            });
        }
        let v_pu = st.v_filt.unwrap_or(target);

        let mode = self.resolve_mode(&mut st, &cfg, now);

        let q_star = match mode {
            Mode::VoltVar => modes::q_star_volt_var(&cfg, v_pu),
            Mode::ConstPf => modes::q_star_const_pf(&cfg, me.p_mw),
            Mode::ConstQ => modes::q_star_const_q(&cfg),
            Mode::Remote => modes::q_star_remote(st.remote_q),
        };

        let q_cap = capability_cap(cfg.limits.s_rating_mva, cfg.limits.q_max_abs_mvar, me.p_mw);
        let (q, clamped) = clamp_to_capability(q_star, q_cap);
        let q = apply_interlocks(q, me.grid_tied, me.thermal_derate);
        let q_cmd = ramp_limit(q, st.q_cmd, cfg.limits.q_ramp_mvar_per_s, dt);

        st.q_cmd = q_cmd;
        st.clamped = clamped;
        st.effective_mode = mode;
        self.pcs.set_reactive_power(q_cmd);
        st.last_tick = Some(now);

        debug!(
            mode = %mode,
            v_pu,
            q_star_mvar = q_star,
            q_cap_mvar = q_cap,
            clamped,
            grid_tied = me.grid_tied,
            q_cmd_mvar = q_cmd,
            "control tick"
        );

        TickReport {
            mode,
            v_pu,
            q_star_mvar: q_star,
            q_cap_mvar: q_cap,
            clamped,
            q_cmd_mvar: q_cmd,
        }
    }

    fn resolve_mode(&self, st: &mut ControllerState, cfg: &VoltVarConfig, now: Instant) -> Mode {
        if cfg.mode != Mode::Remote {
            st.in_fallback = false;
            return cfg.mode;
        }
        let timeout = Duration::try_from_secs_f64(cfg.fallbacks.remote_timeout_s).unwrap_or(Duration::MAX);
        let stale = match st.remote_ts {
            Some(ts) => now.saturating_duration_since(ts) > timeout,
            None => true,
        };
        if stale {
            if !st.in_fallback {
                warn!(
                    default_mode = %cfg.fallbacks.default_mode,
                    remote_timeout_s = cfg.fallbacks.remote_timeout_s,
                    "remote timeout, falling back"
                );
            }
            st.in_fallback = true;
            cfg.fallbacks.default_mode
        } else {
            if st.in_fallback {
                info!("remote setpoint fresh again, leaving fallback");
            }
            st.in_fallback = false;
            Mode::Remote
        }
    }

    /// Snapshot from one coherent read of controller state and exactly one
    /// measurement fetch.
    pub fn status(&self) -> Status {
        let st = self.state.read();
        let me: Measurement = self.meas.get();
        let cfg = &st.cfg;
        Status {
            mode: cfg.mode,
            effective_mode: st.effective_mode,
            safety_state: st.safety.state(),
            v_pu: st.v_filt,
            q_set_mvar: st.q_cmd,
            q_cap_mvar: capability_cap(cfg.limits.s_rating_mva, cfg.limits.q_max_abs_mvar, me.p_mw),
            clamped: st.clamped,
            derate: effective_derate(me.thermal_derate),
            grid_tied: me.grid_tied,
            tick_interval_ms: self.tick.as_millis() as u64,
            pcs_last_q_mvar: self.pcs.last_q(),
            remote_q_mvar: st.remote_q,
            remote_ttl_s: st.remote_ttl.map(|d| d.as_secs_f64()),
            voltage_kv: me.v_pcc_kv,
            frequency_hz: me.frequency_hz,
            active_power_mw: me.p_mw,
            timestamp: Utc::now(),
        }
    }

    /// Switch operating mode. Unknown mode strings are rejected and the
    /// current mode is kept.
    pub fn set_mode(&self, mode: &str) -> Result<Mode, CommandError> {
        let mode = Mode::from_str(mode).map_err(|_| CommandError::UnknownMode(mode.to_string()))?;
        let mut st = self.state.write();
        if st.cfg.mode != mode {
            info!(from = %st.cfg.mode, to = %mode, "mode change");
            let next = VoltVarConfig {
                mode,
                ..(*st.cfg).clone()
            };
            st.cfg = Arc::new(next);
        }
        Ok(mode)
    }

    pub fn set_remote(&self, q_mvar: f64, ttl: Duration) -> Result<(), CommandError> {
        self.set_remote_at(q_mvar, ttl, Instant::now())
    }

    /// Record a remote setpoint received at `now`.
    ///
    /// `ttl` is stored for reporting only; staleness is governed by
    /// `fallbacks.remote_timeout_s`.
    pub fn set_remote_at(&self, q_mvar: f64, ttl: Duration, now: Instant) -> Result<(), CommandError> {
        if !q_mvar.is_finite() {
            return Err(CommandError::InvalidSetpoint(q_mvar));
        }
        let mut st = self.state.write();
        st.remote_q = q_mvar;
        st.remote_ts = Some(now);
        st.remote_ttl = Some(ttl);
        debug!(q_set_mvar = q_mvar, ttl_s = ttl.as_secs_f64(), "remote setpoint");
        Ok(())
    }

    /// Validate and atomically replace the whole configuration. On error the
    /// active configuration is untouched.
    pub fn update_config(&self, cfg: VoltVarConfig) -> Result<(), ConfigError> {
        cfg.validate()?;
        let mut st = self.state.write();
        info!(version = cfg.version, mode = %cfg.mode, "config updated");
        st.cfg = Arc::new(cfg);
        Ok(())
    }

    pub fn config(&self) -> Arc<VoltVarConfig> {
        Arc::clone(&self.state.read().cfg)
    }

    pub fn safety_state(&self) -> SafetyState {
        self.state.read().safety.state()
    }

    /// Last tick time, if any tick has run
    pub fn last_tick(&self) -> Option<Instant> {
        self.state.read().last_tick
    }
}
