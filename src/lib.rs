//! Monitor JBD/Xiaoxiang LiFePO4 Battery Management Systems over Bluetooth Low Energy
//!
//! The BMS has a BLE interface exposing a UART-style GATT service with a write
//! and a notify characteristic. On top of that runs a proprietary
//! request-response byte protocol: `0xDD`-framed packets carrying a handful of
//! record kinds, of which the two that matter here are basic info (command
//! `0x03`) and per-cell voltages (command `0x04`).
//!
//! The crate polls the BMS on a fixed interval, reassembles response frames
//! from the fragmented notification stream, decodes and sanity-checks the
//! readings, derives power and a time-to-full/-empty estimate, and keeps the
//! latest accepted values in a shared [`TelemetryStore`] alongside an
//! append-only CSV history log. The connection survives device disappearance
//! and malformed frames, backing off and reconnecting until a configurable
//! failure budget is exhausted.
//!
//! Currently the following data can be accessed:
//!
//! - Battery voltage (V), current (A) and power (W)
//! - State of charge (%), remaining and nominal capacity (Ah)
//! - Cycles (count), temperature (°C)
//! - Protection flags and balancer state
//! - Cell voltages (V) with min/max/average/delta
//!
//! # Example
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let config = jbdread::Config::default();
//!     let (store, reader) = jbdread::TelemetryStore::open(&config.log_file);
//!     let transport = jbdread::BleTransport::new(&config.device_name);
//!     let mut monitor = jbdread::Monitor::new(transport, config, store);
//!
//!     tokio::spawn(async move {
//!         if let Some(snapshot) = reader.latest().snapshot {
//!             println!("{:.2} V, SOC {} %", snapshot.reading.voltage_v, snapshot.reading.soc_pct);
//!         }
//!     });
//!
//!     monitor.run().await
//! # }
//! ```

mod config;
mod frame;
mod message;
pub mod metrics;
mod monitor;
mod store;
mod transport;
mod validate;

pub use config::Config;
pub use frame::{Frame, FrameAssembler};
pub use message::{
    BalanceStatus, BasicInfo, CellVoltages, DecodeError, Message, ProtectionFlag, ProtectionStatus,
};
pub use monitor::{ConnectionState, Monitor};
pub use store::{History, StoreReader, StoreState, TelemetrySnapshot, TelemetryStore};
pub use transport::{BleTransport, ChunkReceiver, Transport};
pub use validate::{Rejection, SessionStats, Validator};
