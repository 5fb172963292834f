//! Per-mode reactive power strategies.
//!
//! Each function returns a raw, unclamped target in MVAr. Capability,
//! interlocks and ramping are applied afterwards by [`super::limits`].

use crate::domain::{CurvePoint, VoltVarConfig};

/// Power factor bounds applied before evaluating `tan(acos(pf))`.
pub const PF_MIN: f64 = 0.1;
pub const PF_MAX: f64 = 0.9999;

/// Piecewise-linear Q(V) lookup, output in per-unit of `q_max_abs_mvar`.
///
/// Voltages outside the curve pin to the nearest end point.
pub fn q_star_volt_var(cfg: &VoltVarConfig, v_pu: f64) -> f64 {
    curve_q_pu(&cfg.volt_var.points, v_pu) * cfg.limits.q_max_abs_mvar
}

fn curve_q_pu(pts: &[CurvePoint], v_pu: f64) -> f64 {
    let (Some(first), Some(last)) = (pts.first(), pts.last()) else {
        return 0.0;
    };
    if v_pu <= first.v_pu {
        return first.q_pu;
    }
    if v_pu >= last.v_pu {
        return last.q_pu;
    }
    pts.windows(2)
        .find(|w| v_pu >= w[0].v_pu && v_pu <= w[1].v_pu)
        .map(|w| {
            let (p1, p2) = (w[0], w[1]);
            let t = (v_pu - p1.v_pu) / (p2.v_pu - p1.v_pu);
            p1.q_pu + t * (p2.q_pu - p1.q_pu)
        })
        .unwrap_or(0.0)
}

/// Constant power factor: `Q = P * tan(acos(pf))`.
pub fn q_star_const_pf(cfg: &VoltVarConfig, p_mw: f64) -> f64 {
    let pf = cfg.pf_setpoint.clamp(PF_MIN, PF_MAX);
    p_mw * pf.acos().tan()
}

pub fn q_star_const_q(cfg: &VoltVarConfig) -> f64 {
    cfg.q_setpoint_mvar
}

/// Latest remote setpoint, verbatim. Staleness is the controller's concern.
pub fn q_star_remote(remote_q_mvar: f64) -> f64 {
    remote_q_mvar
}
