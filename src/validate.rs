//! Plausibility filtering of decoded readings.
//!
//! BLE corruption that survives framing, plus occasional garbage registers
//! from the BMS itself, produce readings that are physically impossible for
//! a battery: SOC above 100 %, currents no installed charger could source,
//! or step changes no chemistry exhibits between two polls. Such readings
//! are counted and discarded before they can reach the snapshot or the log.

use crate::message::BasicInfo;
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

/// Largest current the hardware can plausibly move, in A.
const MAX_CURRENT_A: f64 = 20.0;
/// Largest believable SOC change between two consecutive readings.
const MAX_SOC_JUMP: i16 = 25;
/// Largest believable voltage change between two consecutive readings, in V.
const MAX_VOLTAGE_JUMP_V: f64 = 2.0;

/// Why a decoded reading was refused.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Rejection {
    #[error("impossible state of charge: {0} %")]
    SocOutOfRange(u8),
    #[error("implausible current spike: {0:+.2} A")]
    CurrentSpike(f64),
    #[error("state of charge jumped {0} points since last accepted reading")]
    SocJump(i16),
    #[error("voltage jumped {0:.2} V since last accepted reading")]
    VoltageJump(f64),
}

/// Cumulative per-process counters, mutated only by the [`Validator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// Readings that passed validation
    pub accepted: u64,
    /// Readings rejected as anomalous
    pub rejected: u64,
    /// SOC of the most recent accepted reading
    pub last_valid_soc: Option<u8>,
    /// Voltage of the most recent accepted reading
    pub last_valid_voltage: Option<f64>,
    /// When the most recent reading was accepted
    pub last_reading_time: Option<DateTime<Local>>,
}

/// Gatekeeper between the decoder and the telemetry store.
///
/// A rejected candidate leaves the last-accepted state untouched, so a run
/// of anomalies cannot widen its own acceptance window.
#[derive(Debug, Default)]
pub struct Validator {
    stats: SessionStats,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Test a candidate against the acceptance rules, updating the session
    /// counters either way.
    pub fn check(&mut self, candidate: &BasicInfo) -> Result<(), Rejection> {
        match self.inspect(candidate) {
            Ok(()) => {
                self.stats.accepted += 1;
                self.stats.last_valid_soc = Some(candidate.soc_pct);
                self.stats.last_valid_voltage = Some(candidate.voltage_v);
                self.stats.last_reading_time = Some(Local::now());
                Ok(())
            }
            Err(rejection) => {
                self.stats.rejected += 1;
                Err(rejection)
            }
        }
    }

    // Rules evaluated in order; the first match rejects.
    fn inspect(&self, candidate: &BasicInfo) -> Result<(), Rejection> {
        if candidate.soc_pct > 100 {
            return Err(Rejection::SocOutOfRange(candidate.soc_pct));
        }
        if candidate.current_a.abs() > MAX_CURRENT_A {
            return Err(Rejection::CurrentSpike(candidate.current_a));
        }
        if let Some(last_soc) = self.stats.last_valid_soc {
            let jump = candidate.soc_pct as i16 - last_soc as i16;
            if jump.abs() > MAX_SOC_JUMP {
                return Err(Rejection::SocJump(jump));
            }
        }
        if let Some(last_voltage) = self.stats.last_valid_voltage {
            let jump = candidate.voltage_v - last_voltage;
            if jump.abs() > MAX_VOLTAGE_JUMP_V {
                return Err(Rejection::VoltageJump(jump));
            }
        }
        Ok(())
    }
}
