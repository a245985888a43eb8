use crate::frame::Frame;
use crate::message::DecodeError;
use serde::Serialize;

/// A verbatim request which asks the BMS to report its basic info record.
/// The last three bytes are the vendor checksum and the frame terminator.
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77];

/// Every fixed field of the record lies below this frame length.
const MIN_FRAME_LEN: usize = 27;
/// The first temperature sensor field ends at this frame length.
const TEMP_FRAME_LEN: usize = 29;

/// Raw temperature readings outside this range are sensor noise or an offset
/// misread, not a real measurement.
const TEMP_RAW_RANGE: std::ops::RangeInclusive<u16> = 2000..=4000;
const TEMP_CELSIUS_RANGE: std::ops::RangeInclusive<f64> = -50.0..=100.0;

/// The pack-level state record, answering command `0x03`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInfo {
    /// Pack voltage in V
    pub voltage_v: f64,
    /// Pack current in A. Positive while charging, negative while discharging
    pub current_a: f64,
    /// Remaining capacity in Ah
    pub remaining_ah: f64,
    /// Nominal (rated) capacity in Ah
    pub nominal_ah: f64,
    /// Lifetime number of battery cycles
    pub cycles: u16,
    /// State of charge in %
    pub soc_pct: u8,
    /// First temperature sensor in °C, if the sensor reported a plausible value
    pub temperature_c: Option<f64>,
    /// Protection flags raised by the BMS
    pub protection: ProtectionStatus,
    /// Balancer state, one bit per cell
    pub balance: BalanceStatus,
}

impl BasicInfo {
    pub(crate) fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let bytes = frame.as_bytes();
        if bytes.len() < MIN_FRAME_LEN {
            return Err(DecodeError::Truncated {
                got: bytes.len(),
                need: MIN_FRAME_LEN,
            });
        }

        let voltage_v = u16::from_be_bytes([bytes[4], bytes[5]]) as f64 / 100.0;
        let current_a = i16::from_be_bytes([bytes[6], bytes[7]]) as f64 / 100.0;
        let remaining_ah = u16::from_be_bytes([bytes[8], bytes[9]]) as f64 / 100.0;
        let nominal_ah = u16::from_be_bytes([bytes[10], bytes[11]]) as f64 / 100.0;
        let cycles = u16::from_be_bytes([bytes[12], bytes[13]]);

        let temperature_c = if bytes.len() >= TEMP_FRAME_LEN {
            decode_temperature(u16::from_be_bytes([bytes[27], bytes[28]]))
        } else {
            None
        };

        Ok(Self {
            voltage_v,
            current_a,
            remaining_ah,
            nominal_ah,
            cycles,
            soc_pct: bytes[23],
            temperature_c,
            protection: ProtectionStatus(bytes[21]),
            balance: BalanceStatus(bytes[17]),
        })
    }
}

/// Decode a raw temperature register: tenths of a Kelvin, 2731 == 0.0 °C.
///
/// Both the raw register and the resulting Celsius value are range-checked;
/// a wild value is reported as absent rather than propagated into plots and
/// the history log.
fn decode_temperature(raw: u16) -> Option<f64> {
    if !TEMP_RAW_RANGE.contains(&raw) {
        return None;
    }
    let celsius = (raw as f64 - 2731.0) / 10.0;
    TEMP_CELSIUS_RANGE.contains(&celsius).then_some(celsius)
}

/// The protection flag byte. Zero means no protection is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtectionStatus(pub u8);

/// One protection condition the BMS can raise, by bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtectionFlag {
    CellOvervoltage,
    CellUndervoltage,
    PackOvervoltage,
    PackUndervoltage,
    ChargeOvertemperature,
    ChargeUndertemperature,
    DischargeOvertemperature,
    DischargeUndertemperature,
}

impl ProtectionFlag {
    const ALL: [ProtectionFlag; 8] = [
        Self::CellOvervoltage,
        Self::CellUndervoltage,
        Self::PackOvervoltage,
        Self::PackUndervoltage,
        Self::ChargeOvertemperature,
        Self::ChargeUndertemperature,
        Self::DischargeOvertemperature,
        Self::DischargeUndertemperature,
    ];
}

impl ProtectionStatus {
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// Every active protection condition, not just the lowest set bit.
    pub fn active(&self) -> Vec<ProtectionFlag> {
        ProtectionFlag::ALL
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, flag)| *flag)
            .collect()
    }
}

/// The balancer byte: bit *i* set means cell *i + 1* is being balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceStatus(pub u8);

impl BalanceStatus {
    /// 1-based numbers of the cells currently being balanced.
    pub fn cells(&self) -> Vec<u8> {
        (0..8).filter(|bit| self.0 & (1 << bit) != 0).map(|bit| bit + 1).collect()
    }
}

/// A representative basic info payload: 13.00 V, 5.00 A charging, 50.00 Ah of
/// 100.00 Ah, 42 cycles, SOC 50 %, cells 1 and 3 balancing, no protections,
/// first temperature sensor at 26.9 °C.
#[cfg(test)]
pub(crate) fn test_payload() -> Vec<u8> {
    vec![
        0x05, 0x14, // voltage 1300
        0x01, 0xF4, // current 500
        0x13, 0x88, // remaining 5000
        0x27, 0x10, // nominal 10000
        0x00, 0x2A, // cycles 42
        0x00, 0x00, // production date
        0x00, 0x05, // balance, low half
        0x00, 0x00, // balance, high half
        0x00, 0x00, // protection
        0x10, // software version
        0x32, // soc 50
        0x03, // FET status
        0x04, // cell count
        0x01, // NTC count
        0x0B, 0xB8, // NTC 1: 3000 -> 26.9 C
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{make_frame, FrameAssembler};
    use crate::message::CMD_BASIC_INFO;

    fn decode_payload(payload: &[u8]) -> Result<BasicInfo, DecodeError> {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&make_frame(CMD_BASIC_INFO, payload));
        BasicInfo::decode(&frames[0])
    }

    #[test]
    fn test_decode_basic_info() {
        let info = decode_payload(&test_payload()).unwrap();
        assert_eq!(info.voltage_v, 13.0);
        assert_eq!(info.current_a, 5.0);
        assert_eq!(info.remaining_ah, 50.0);
        assert_eq!(info.nominal_ah, 100.0);
        assert_eq!(info.cycles, 42);
        assert_eq!(info.soc_pct, 50);
        assert_eq!(info.temperature_c, Some(26.9));
        assert!(info.protection.is_ok());
        assert_eq!(info.balance.cells(), vec![1, 3]);
    }

    #[test]
    fn test_decode_negative_current_is_discharge() {
        let mut payload = test_payload();
        // -3.50 A
        payload[2..4].copy_from_slice(&(-350i16).to_be_bytes());
        let info = decode_payload(&payload).unwrap();
        assert_eq!(info.current_a, -3.5);
    }

    #[test]
    fn test_decode_truncated() {
        let payload = vec![0u8; 10];
        let err = decode_payload(&payload).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { got: 17, need: 27 });
    }

    #[test]
    fn test_decode_without_temperature_field() {
        // 20-byte payload: exactly the minimum frame, no NTC data.
        let payload = test_payload()[..20].to_vec();
        let info = decode_payload(&payload).unwrap();
        assert_eq!(info.temperature_c, None);
        assert_eq!(info.soc_pct, 50);
    }

    #[test]
    fn test_temperature_zero_celsius() {
        assert_eq!(decode_temperature(2731), Some(0.0));
    }

    #[test]
    fn test_temperature_plausible() {
        assert_eq!(decode_temperature(3000), Some(26.9));
    }

    #[test]
    fn test_temperature_raw_out_of_range() {
        assert_eq!(decode_temperature(100), None);
        assert_eq!(decode_temperature(4500), None);
    }

    #[test]
    fn test_protection_flags_all_reported() {
        let status = ProtectionStatus(0b1000_0011);
        assert!(!status.is_ok());
        assert_eq!(
            status.active(),
            vec![
                ProtectionFlag::CellOvervoltage,
                ProtectionFlag::CellUndervoltage,
                ProtectionFlag::DischargeUndertemperature,
            ]
        );
    }

    #[test]
    fn test_balance_empty() {
        assert!(BalanceStatus(0).cells().is_empty());
    }
}
