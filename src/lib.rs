//! Volt-VAR reactive power controller for a grid-tied BESS.
//!
//! A fixed-period tick reads grid measurements, computes a reactive power
//! target for the active mode, applies capability, interlock, derate and
//! ramp limits, and commits the result to the PCS.

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod telemetry;
