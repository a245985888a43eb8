use crate::frame::Frame;
use serde::Serialize;

/// A verbatim request which asks the BMS to report per-cell voltages.
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x04, 0x00, 0xFF, 0xFC, 0x77];

/// Payload bytes start at this frame offset.
const PAYLOAD_START: usize = 4;

/// The per-cell voltage record, answering command `0x04`.
///
/// Each cell voltage is a big-endian millivolt register; the cell count is
/// whatever the declared payload length implies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellVoltages {
    /// Cell voltages in V, ordered as reported by the BMS
    pub cells_v: Vec<f64>,
}

impl CellVoltages {
    /// Decode never fails: a frame shorter than its declared cell count
    /// yields the cells that are actually present.
    pub(crate) fn decode(frame: &Frame) -> Self {
        let bytes = frame.as_bytes();
        let declared = frame.payload_len() / 2;
        let cells_v = (0..declared)
            .map_while(|i| {
                let at = PAYLOAD_START + i * 2;
                bytes
                    .get(at..at + 2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]) as f64 / 1000.0)
            })
            .collect();
        Self { cells_v }
    }

    pub fn min_v(&self) -> Option<f64> {
        self.cells_v.iter().copied().reduce(f64::min)
    }

    pub fn max_v(&self) -> Option<f64> {
        self.cells_v.iter().copied().reduce(f64::max)
    }

    pub fn average_v(&self) -> Option<f64> {
        if self.cells_v.is_empty() {
            return None;
        }
        Some(self.cells_v.iter().sum::<f64>() / self.cells_v.len() as f64)
    }

    /// Spread between the highest and lowest cell, the balancer's workload.
    pub fn delta_v(&self) -> Option<f64> {
        Some(self.max_v()? - self.min_v()?)
    }
}
