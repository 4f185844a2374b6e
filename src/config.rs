//! Per-port compiler defaults.
//!
//! Grounded on `PasqualeMainolfi-Qubx`'s `StreamParameters`: a plain struct
//! with a `Default` impl, overridable per instance, carrying the knobs the
//! original source hardcoded onto `Port.__init__` (`DAC_STEP`, `if_freq`)
//! and its module-level alignment default.

use serde::{Deserialize, Serialize};

/// Sample-grid and carrier defaults applied when a [`crate::port::Port`] is
/// constructed without explicit overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Sample step of the rendered waveform, in nanoseconds.
    pub dac_step: f64,
    /// Sideband / intermediate frequency, in GHz.
    pub sideband_freq: f64,
    /// Fixed hardware delay relative to other ports, in nanoseconds.
    pub skew: f64,
    /// Default alignment mode for a fresh port's base frame.
    pub default_align: AlignMode,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            dac_step: 1.0,
            sideband_freq: 0.25,
            skew: 0.0,
            default_align: AlignMode::Sequential,
        }
    }
}

/// Alignment mode for a `Sequence::align` scoped frame or a trigger edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignMode {
    Sequential,
    Left,
    Middle,
    Right,
}

impl AlignMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AlignMode::Sequential => "sequential",
            AlignMode::Left => "left",
            AlignMode::Middle => "middle",
            AlignMode::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sequential" => Some(AlignMode::Sequential),
            "left" => Some(AlignMode::Left),
            "middle" => Some(AlignMode::Middle),
            "right" => Some(AlignMode::Right),
            _ => None,
        }
    }
}
