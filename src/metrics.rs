//! Metrics derived from an accepted reading: power and time-to-target.

use crate::message::BasicInfo;
use serde::Serialize;
use std::fmt;

/// Below this current the pack is effectively idle and any time estimate
/// would be division-by-noise.
const IDLE_CURRENT_A: f64 = 0.1;
/// Estimates beyond this horizon are meaningless precision.
const MAX_ETA_HOURS: f64 = 100.0;

/// Signed pack power in W. Negative means net draw.
pub fn power_w(reading: &BasicInfo) -> f64 {
    reading.voltage_v * reading.current_a
}

/// Which target the time estimate runs towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EtaKind {
    /// Charging: time until the pack is full
    ToFull,
    /// Discharging: time until the pack is empty
    Remaining,
}

/// A time-to-target estimate, in whole hours and minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eta {
    pub hours: u32,
    pub minutes: u32,
    pub kind: EtaKind,
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            EtaKind::ToFull => "to full",
            EtaKind::Remaining => "remaining",
        };
        write!(f, "{}h {}m {label}", self.hours, self.minutes)
    }
}

/// Estimate the time to full (charging) or to empty (discharging).
///
/// `None` when the pack is idle or the estimate exceeds 100 h; callers
/// render that as "N/A".
pub fn eta(reading: &BasicInfo) -> Option<Eta> {
    if reading.current_a.abs() < IDLE_CURRENT_A {
        return None;
    }

    let (hours, kind) = if reading.current_a > 0.0 {
        let to_full_ah = reading.nominal_ah * (100 - reading.soc_pct.min(100)) as f64 / 100.0;
        (to_full_ah / reading.current_a, EtaKind::ToFull)
    } else {
        let held_ah = reading.nominal_ah * reading.soc_pct as f64 / 100.0;
        (held_ah / reading.current_a.abs(), EtaKind::Remaining)
    };

    if hours > MAX_ETA_HOURS {
        return None;
    }

    let total_minutes = (hours * 60.0) as u32;
    Some(Eta {
        hours: total_minutes / 60,
        minutes: total_minutes % 60,
        kind,
    })
}

/// Render an estimate the way the dashboard shows it.
pub fn eta_string(reading: &BasicInfo) -> String {
    match eta(reading) {
        Some(eta) => eta.to_string(),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BalanceStatus, ProtectionStatus};

    fn reading(soc_pct: u8, voltage_v: f64, current_a: f64) -> BasicInfo {
        BasicInfo {
            voltage_v,
            current_a,
            remaining_ah: 50.0,
            nominal_ah: 100.0,
            cycles: 0,
            soc_pct,
            temperature_c: None,
            protection: ProtectionStatus(0),
            balance: BalanceStatus(0),
        }
    }

    #[test]
    fn test_power() {
        assert_eq!(power_w(&reading(50, 13.0, 5.0)), 65.0);
        assert_eq!(power_w(&reading(50, 13.0, -5.0)), -65.0);
    }

    #[test]
    fn test_eta_idle_is_undefined() {
        assert_eq!(eta(&reading(50, 13.0, 0.05)), None);
        assert_eq!(eta_string(&reading(50, 13.0, 0.05)), "N/A");
    }

    #[test]
    fn test_eta_charging() {
        // 50 Ah to full at 5 A: 10 h.
        let eta = eta(&reading(50, 13.0, 5.0)).unwrap();
        assert_eq!((eta.hours, eta.minutes, eta.kind), (10, 0, EtaKind::ToFull));
        assert_eq!(eta.to_string(), "10h 0m to full");
    }

    #[test]
    fn test_eta_discharging() {
        // 75 Ah held, drained at 10 A: 7.5 h.
        let eta = eta(&reading(75, 13.0, -10.0)).unwrap();
        assert_eq!(
            (eta.hours, eta.minutes, eta.kind),
            (7, 30, EtaKind::Remaining)
        );
        assert_eq!(eta.to_string(), "7h 30m remaining");
    }

    #[test]
    fn test_eta_beyond_horizon_is_undefined() {
        // 99 Ah held at 0.5 A would be 198 h.
        assert_eq!(eta(&reading(99, 13.0, -0.5)), None);
    }
}
