//! Decoders for the two BMS response record kinds.
//!
//! The protocol is a vendor byte-protocol with no published schema; field
//! offsets follow the register map commonly implemented by JBD/Xiaoxiang
//! BMS units. Only the two records that drive the displayed metrics are
//! interpreted.

mod basic_info;
mod cell_voltages;

pub use basic_info::{BalanceStatus, BasicInfo, ProtectionFlag, ProtectionStatus};
pub use cell_voltages::CellVoltages;

pub(crate) use basic_info::REQUEST as REQ_BASIC_INFO;
pub(crate) use cell_voltages::REQUEST as REQ_CELL_VOLTAGES;

#[cfg(test)]
pub(crate) use basic_info::test_payload as basic_info_test_payload;

use crate::frame::Frame;
use thiserror::Error;

/// Command code of the basic info record.
pub(crate) const CMD_BASIC_INFO: u8 = 0x03;
/// Command code of the per-cell voltages record.
pub(crate) const CMD_CELL_VOLTAGES: u8 = 0x04;

/// Why a validated frame could not be decoded into a record.
///
/// None of these are fatal: the record is discarded and the pipeline
/// continues with the next frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame answers a command this crate does not interpret.
    #[error("unknown command code 0x{0:02x}")]
    UnknownCommand(u8),
    /// The frame is shorter than the record's fixed field layout requires.
    #[error("frame truncated: {got} bytes, need at least {need}")]
    Truncated { got: usize, need: usize },
}

/// A decoded telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    BasicInfo(BasicInfo),
    CellVoltages(CellVoltages),
}

impl Message {
    /// Decode a validated frame, dispatching on its command code.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        match frame.command() {
            CMD_BASIC_INFO => Ok(Self::BasicInfo(BasicInfo::decode(frame)?)),
            CMD_CELL_VOLTAGES => Ok(Self::CellVoltages(CellVoltages::decode(frame))),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{make_frame, FrameAssembler};

    #[test]
    fn test_decode_dispatches_unknown_command() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&make_frame(0x05, &[0x00]));
        let err = Message::decode(&frames[0]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownCommand(0x05));
    }

    #[test]
    fn test_decode_is_idempotent() {
        let payload = basic_info_test_payload();
        let mut assembler = FrameAssembler::new();
        let frames = assembler.feed(&make_frame(CMD_BASIC_INFO, &payload));
        let first = Message::decode(&frames[0]).unwrap();
        let second = Message::decode(&frames[0]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_frame_split_mid_payload_decodes_end_to_end() {
        let bytes = make_frame(CMD_BASIC_INFO, &basic_info_test_payload());
        let (first, second) = bytes.split_at(10);

        let mut assembler = FrameAssembler::new();
        assert!(assembler.feed(first).is_empty());
        let frames = assembler.feed(second);
        assert_eq!(frames.len(), 1);

        let Message::BasicInfo(info) = Message::decode(&frames[0]).unwrap() else {
            panic!("expected a basic info record");
        };
        assert_eq!(info.voltage_v, 13.0);
        assert_eq!(info.current_a, 5.0);
        assert_eq!(info.soc_pct, 50);
    }
}
