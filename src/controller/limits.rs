//! Capability clamp, grid interlock, thermal derate and ramp limiting.
//!
//! Applied in that order so the ramp always tracks an already-feasible
//! target.

/// Tolerance used to flag a target as sitting on the capability bound.
pub const CLAMP_TOLERANCE_MVAR: f64 = 1e-6;

/// `min(q_max_abs, sqrt(max(s_rating^2 - p^2, 0)))`
pub fn capability_cap(s_rating_mva: f64, q_max_abs_mvar: f64, p_mw: f64) -> f64 {
    let headroom = (s_rating_mva * s_rating_mva - p_mw * p_mw).max(0.0).sqrt();
    q_max_abs_mvar.min(headroom)
}

/// Clamp into `[-q_cap, q_cap]`. Returns the clamped value and whether the
/// result sits on the bound.
pub fn clamp_to_capability(q_star: f64, q_cap: f64) -> (f64, bool) {
    let q = q_star.clamp(-q_cap, q_cap);
    (q, q.abs() >= q_cap - CLAMP_TOLERANCE_MVAR)
}

/// Derate factor as applied by the tick: clamped to [0, 1].
pub fn effective_derate(thermal_derate: f64) -> f64 {
    // NaN derate from a misbehaving provider is treated as fully derated
    if thermal_derate.is_nan() {
        0.0
    } else {
        thermal_derate.clamp(0.0, 1.0)
    }
}

/// Grid-tied interlock (hard zero) followed by thermal derate.
pub fn apply_interlocks(q_star: f64, grid_tied: bool, thermal_derate: f64) -> f64 {
    let q = if grid_tied { q_star } else { 0.0 };
    q * effective_derate(thermal_derate)
}

/// Bound `target` to `prev ± ramp_rate * dt_s`. A NaN target holds `prev`.
pub fn ramp_limit(target: f64, prev: f64, ramp_mvar_per_s: f64, dt_s: f64) -> f64 {
    if target.is_nan() {
        return prev;
    }
    let step = (ramp_mvar_per_s * dt_s).max(0.0);
    target.clamp(prev - step, prev + step)
}
