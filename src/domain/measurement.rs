use serde::{Deserialize, Serialize};

/// Grid measurement snapshot at the interconnection point.
///
/// Produced by a [`crate::hardware::MeasurementProvider`] once per tick and
/// consumed read-only by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub v_pcc_kv: f64,
    pub v_nom_kv: f64,
    pub frequency_hz: f64,
    pub p_mw: f64,
    /// Informational only; the controller never reads it.
    pub q_mvar: f64,
    pub grid_tied: bool,
    /// Thermal derate factor, nominally in [0, 1].
    pub thermal_derate: f64,
}

impl Measurement {
    /// Nominal 13.8 kV feeder, grid-tied, zero flow.
    pub fn nominal() -> Self {
        Self {
            v_pcc_kv: 13.8,
            v_nom_kv: 13.8,
            frequency_hz: 60.0,
            p_mw: 0.0,
            q_mvar: 0.0,
            grid_tied: true,
            thermal_derate: 1.0,
        }
    }

    /// Per-unit voltage. Guards against a zero nominal.
    pub fn v_pu(&self) -> f64 {
        self.v_pcc_kv / self.v_nom_kv.max(1e-6)
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::nominal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v_pu_nominal() {
        let m = Measurement::nominal();
        assert!((m.v_pu() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_v_pu_zero_nominal_is_finite() {
        let m = Measurement {
            v_nom_kv: 0.0,
            ..Measurement::nominal()
        };
        assert!(m.v_pu().is_finite());
    }
}
