//! Site controller configuration.
//!
//! A [`VoltVarConfig`] is only ever handed to the controller after
//! [`VoltVarConfig::validate`] succeeds; the controller swaps it as a whole
//! value and never edits fields in place.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumString};
use thiserror::Error;

/// Configuration load and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{field} must be {requirement}, got {value}")]
    InvalidLimit {
        field: &'static str,
        requirement: &'static str,
        value: f64,
    },
    #[error("volt_var.v_q_points_pu requires at least 2 points, got {0}")]
    TooFewCurvePoints(usize),
    #[error("volt_var.v_q_points_pu must be strictly increasing in voltage (point {index}: {v_pu} <= {prev_v_pu})")]
    NonMonotonicCurve {
        index: usize,
        v_pu: f64,
        prev_v_pu: f64,
    },
    #[error("fallbacks.default_mode cannot be REMOTE")]
    RemoteFallback,
    #[error("control tick interval must be non-zero")]
    ZeroTick,
}

/// Reactive power operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    VoltVar,
    ConstPf,
    ConstQ,
    Remote,
}

/// One point of the Volt-VAR curve, stored on disk as `[v_pu, q_pu]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct CurvePoint {
    pub v_pu: f64,
    pub q_pu: f64,
}

impl CurvePoint {
    pub const fn new(v_pu: f64, q_pu: f64) -> Self {
        Self { v_pu, q_pu }
    }
}

impl From<[f64; 2]> for CurvePoint {
    fn from([v_pu, q_pu]: [f64; 2]) -> Self {
        Self { v_pu, q_pu }
    }
}

impl From<CurvePoint> for [f64; 2] {
    fn from(p: CurvePoint) -> Self {
        [p.v_pu, p.q_pu]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltVarCurve {
    #[serde(rename = "v_q_points_pu")]
    pub points: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub s_rating_mva: f64,
    pub q_max_abs_mvar: f64,
    pub q_ramp_mvar_per_s: f64,
    /// Voltage low-pass filter time constant (s)
    pub v_lpf_tau_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallbacks {
    pub remote_timeout_s: f64,
    pub default_mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltVarConfig {
    #[serde(default)]
    pub version: u32,
    pub mode: Mode,
    #[serde(default = "default_pf")]
    pub pf_setpoint: f64,
    #[serde(default)]
    pub q_setpoint_mvar: f64,
    pub volt_var: VoltVarCurve,
    pub limits: Limits,
    pub fallbacks: Fallbacks,
}

fn default_pf() -> f64 {
    0.95
}

impl Default for VoltVarConfig {
    fn default() -> Self {
        Self {
            version: 1,
            mode: Mode::VoltVar,
            pf_setpoint: default_pf(),
            q_setpoint_mvar: 0.0,
            volt_var: VoltVarCurve {
                points: vec![
                    CurvePoint::new(0.94, 1.0),
                    CurvePoint::new(0.985, 0.0),
                    CurvePoint::new(1.015, 0.0),
                    CurvePoint::new(1.06, -1.0),
                ],
            },
            limits: Limits {
                s_rating_mva: 10.0,
                q_max_abs_mvar: 5.0,
                q_ramp_mvar_per_s: 2.0,
                v_lpf_tau_s: 1.0,
            },
            fallbacks: Fallbacks {
                remote_timeout_s: 5.0,
                default_mode: Mode::VoltVar,
            },
        }
    }
}

impl VoltVarConfig {
    /// Read, parse and validate a YAML site configuration.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML (or JSON) payload.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.limits;
        positive("limits.s_rating_mva", l.s_rating_mva)?;
        positive("limits.q_max_abs_mvar", l.q_max_abs_mvar)?;
        positive("limits.q_ramp_mvar_per_s", l.q_ramp_mvar_per_s)?;
        non_negative("limits.v_lpf_tau_s", l.v_lpf_tau_s)?;
        non_negative("fallbacks.remote_timeout_s", self.fallbacks.remote_timeout_s)?;
        finite("pf_setpoint", self.pf_setpoint)?;
        finite("q_setpoint_mvar", self.q_setpoint_mvar)?;

        if self.fallbacks.default_mode == Mode::Remote {
            return Err(ConfigError::RemoteFallback);
        }

        let pts = &self.volt_var.points;
        if pts.len() < 2 {
            return Err(ConfigError::TooFewCurvePoints(pts.len()));
        }
        for p in pts {
            finite("volt_var.v_q_points_pu", p.v_pu)?;
            finite("volt_var.v_q_points_pu", p.q_pu)?;
        }
        for (i, w) in pts.windows(2).enumerate() {
            if w[1].v_pu <= w[0].v_pu {
                return Err(ConfigError::NonMonotonicCurve {
                    index: i + 1,
                    v_pu: w[1].v_pu,
                    prev_v_pu: w[0].v_pu,
                });
            }
        }
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit {
            field,
            requirement: "finite",
            value,
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit {
            field,
            requirement: "> 0",
            value,
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit {
            field,
            requirement: ">= 0",
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SITE_YAML: &str = r#"
version: 3
mode: VOLT_VAR
pf_setpoint: 0.97
q_setpoint_mvar: 1.5
volt_var:
  v_q_points_pu: [[0.94, 1.0], [0.985, 0.0], [1.015, 0.0], [1.06, -1.0]]
limits:
  s_rating_mva: 10
  q_max_abs_mvar: 5
  q_ramp_mvar_per_s: 2
  v_lpf_tau_s: 1.0
fallbacks:
  remote_timeout_s: 5
  default_mode: CONST_Q
"#;

    #[test]
    fn test_parse_site_yaml() {
        let cfg = VoltVarConfig::from_yaml(SITE_YAML).unwrap();
        assert_eq!(cfg.version, 3);
        assert_eq!(cfg.mode, Mode::VoltVar);
        assert_eq!(cfg.volt_var.points.len(), 4);
        assert_eq!(cfg.volt_var.points[3], CurvePoint::new(1.06, -1.0));
        assert_eq!(cfg.limits.s_rating_mva, 10.0);
        assert_eq!(cfg.fallbacks.remote_timeout_s, 5.0);
        assert_eq!(cfg.fallbacks.default_mode, Mode::ConstQ);
    }

    #[test]
    fn test_missing_mode_rejected() {
        let raw = SITE_YAML.replace("mode: VOLT_VAR\n", "");
        assert!(matches!(
            VoltVarConfig::from_yaml(&raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let raw = SITE_YAML.replace("mode: VOLT_VAR", "mode: FREQ_WATT");
        assert!(VoltVarConfig::from_yaml(&raw).is_err());
    }

    #[test]
    fn test_missing_pf_matches_default() {
        let raw = SITE_YAML.replace("pf_setpoint: 0.97\n", "");
        let cfg = VoltVarConfig::from_yaml(&raw).unwrap();
        assert_eq!(cfg.pf_setpoint, VoltVarConfig::default().pf_setpoint);
    }

    #[test]
    fn test_default_is_valid() {
        assert!(VoltVarConfig::default().validate().is_ok());
    }

    #[test]
    fn test_non_positive_rating_rejected() {
        let mut cfg = VoltVarConfig::default();
        cfg.limits.s_rating_mva = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidLimit { field: "limits.s_rating_mva", .. })
        ));

        let mut cfg = VoltVarConfig::default();
        cfg.limits.q_max_abs_mvar = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_too_few_points_rejected() {
        let mut cfg = VoltVarConfig::default();
        cfg.volt_var.points.truncate(1);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooFewCurvePoints(1))
        ));
    }

    #[test]
    fn test_non_monotonic_curve_rejected() {
        let mut cfg = VoltVarConfig::default();
        cfg.volt_var.points[2].v_pu = cfg.volt_var.points[1].v_pu;
        match cfg.validate() {
            Err(ConfigError::NonMonotonicCurve { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected non-monotonic error, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_fallback_rejected() {
        let mut cfg = VoltVarConfig::default();
        cfg.fallbacks.default_mode = Mode::Remote;
        assert!(matches!(cfg.validate(), Err(ConfigError::RemoteFallback)));
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(Mode::from_str("VOLT_VAR").unwrap(), Mode::VoltVar);
        assert_eq!(Mode::from_str("CONST_PF").unwrap(), Mode::ConstPf);
        assert_eq!(Mode::from_str("CONST_Q").unwrap(), Mode::ConstQ);
        assert_eq!(Mode::from_str("REMOTE").unwrap(), Mode::Remote);
        assert!(Mode::from_str("volt_var").is_err());
        assert_eq!(Mode::ConstPf.to_string(), "CONST_PF");
    }

    #[test]
    fn test_yaml_round_trip_keeps_curve_shape() {
        let cfg = VoltVarConfig::default();
        let raw = cfg.to_yaml().unwrap();
        assert_eq!(VoltVarConfig::from_yaml(&raw).unwrap(), cfg);
    }
}
