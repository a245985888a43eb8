//! The telemetry store: latest snapshot for the dashboard, plus the
//! append-only CSV history log.
//!
//! The store has exactly one writer, the protocol pipeline. Readers hold a
//! cheap cloneable handle and always observe a complete state: snapshot,
//! session stats and connection status are replaced together through a
//! watch channel, never piecewise.

use crate::message::{BasicInfo, CellVoltages};
use crate::metrics;
use crate::monitor::ConnectionState;
use crate::validate::SessionStats;
use anyhow::Context;
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

const CSV_HEADER: &str = "Timestamp,Voltage,Current,SOC,Remaining_Ah,Cycles,Temperature,Power";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The latest accepted telemetry, replaced atomically on every update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// When the most recent record in this snapshot was accepted
    pub timestamp: DateTime<Local>,
    /// Latest accepted basic info record
    pub reading: BasicInfo,
    /// Latest per-cell voltages, if any have arrived yet
    pub cells: Option<CellVoltages>,
    /// Signed pack power in W
    pub power_w: f64,
    /// Rendered time-to-target estimate, "N/A" when indeterminate
    pub eta: String,
}

/// Everything the dashboard reads, published as one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    pub snapshot: Option<TelemetrySnapshot>,
    pub stats: SessionStats,
    pub connection: ConnectionState,
}

/// Time-ordered parallel series for charting, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    pub timestamps: Vec<String>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub soc: Vec<f64>,
    pub power: Vec<f64>,
    pub temperature: Vec<Option<f64>>,
}

/// Writer half of the store, owned by the protocol pipeline.
#[derive(Debug)]
pub struct TelemetryStore {
    tx: watch::Sender<StoreState>,
    log_path: PathBuf,
}

/// Reader half, cloneable, handed to the dashboard.
#[derive(Debug, Clone)]
pub struct StoreReader {
    rx: watch::Receiver<StoreState>,
    log_path: PathBuf,
}

impl TelemetryStore {
    /// Open the store over the given CSV log.
    ///
    /// If the log already holds readings the most recent one is loaded as
    /// the initial snapshot, so the dashboard shows data before the first
    /// BLE poll completes.
    pub fn open(log_path: &Path) -> (Self, StoreReader) {
        let snapshot = last_logged_snapshot(log_path);
        if let Some(snapshot) = &snapshot {
            log::info!(
                "recovered last reading from {}: {}",
                log_path.display(),
                snapshot.timestamp.format(TIMESTAMP_FORMAT)
            );
        }
        let (tx, rx) = watch::channel(StoreState {
            snapshot,
            ..StoreState::default()
        });
        let store = Self {
            tx,
            log_path: log_path.to_path_buf(),
        };
        let reader = StoreReader {
            rx,
            log_path: log_path.to_path_buf(),
        };
        (store, reader)
    }

    /// Publish an accepted reading and append it to the history log.
    ///
    /// A log write failure is reported and swallowed: the next accepted
    /// reading gets its own independent attempt.
    pub fn accept_reading(&self, reading: BasicInfo, stats: &SessionStats) {
        let timestamp = Local::now();
        if let Err(err) = self.append_row(&reading, timestamp) {
            log::error!("failed to append to {}: {err:#}", self.log_path.display());
        }
        self.tx.send_modify(|state| {
            let cells = state.snapshot.take().and_then(|s| s.cells);
            state.snapshot = Some(TelemetrySnapshot {
                timestamp,
                power_w: metrics::power_w(&reading),
                eta: metrics::eta_string(&reading),
                reading,
                cells,
            });
            state.stats = stats.clone();
        });
    }

    /// Publish a fresh per-cell voltage record into the current snapshot.
    ///
    /// Cell data without a prior accepted reading has no snapshot to live
    /// in and is dropped; the next basic info record recreates one.
    pub fn accept_cells(&self, cells: CellVoltages) {
        self.tx.send_modify(|state| {
            if let Some(snapshot) = &mut state.snapshot {
                snapshot.cells = Some(cells);
                snapshot.timestamp = Local::now();
            }
        });
    }

    /// Publish updated session counters, e.g. after a rejected reading.
    pub fn set_stats(&self, stats: SessionStats) {
        self.tx.send_modify(|state| state.stats = stats);
    }

    /// Publish the supervisor's connection status.
    pub fn set_connection(&self, connection: ConnectionState) {
        self.tx.send_modify(|state| state.connection = connection);
    }

    fn append_row(&self, reading: &BasicInfo, timestamp: DateTime<Local>) -> anyhow::Result<()> {
        let write_header = !self.log_path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        if write_header {
            writeln!(file, "{CSV_HEADER}")?;
        }
        let temperature = reading
            .temperature_c
            .map(|t| format!("{t:.1}"))
            .unwrap_or_default();
        writeln!(
            file,
            "{},{:.2},{:.2},{},{:.2},{},{},{:.2}",
            timestamp.format(TIMESTAMP_FORMAT),
            reading.voltage_v,
            reading.current_a,
            reading.soc_pct,
            reading.remaining_ah,
            reading.cycles,
            temperature,
            metrics::power_w(reading),
        )?;
        Ok(())
    }
}

impl StoreReader {
    /// The current store state, cloned out so it stays consistent however
    /// long the caller holds it.
    pub fn latest(&self) -> StoreState {
        self.rx.borrow().clone()
    }

    /// Historical series from the log, restricted to the last `hours`
    /// (0 = all time). Rows that fail to parse are skipped.
    pub fn history(&self, hours: u32) -> anyhow::Result<History> {
        let mut history = History::default();
        if !self.log_path.exists() {
            return Ok(history);
        }
        let content = std::fs::read_to_string(&self.log_path)
            .with_context(|| format!("reading {}", self.log_path.display()))?;
        let cutoff = (hours > 0).then(|| Local::now() - Duration::hours(hours as i64));

        for line in content.lines().skip(1) {
            let Some(row) = LogRow::parse(line) else {
                log::debug!("skipping unparseable log row: {line}");
                continue;
            };
            if let Some(cutoff) = cutoff {
                if row.timestamp < cutoff {
                    continue;
                }
            }
            history.timestamps.push(row.timestamp.format(TIMESTAMP_FORMAT).to_string());
            history.voltage.push(row.voltage);
            history.current.push(row.current);
            history.soc.push(row.soc);
            history.power.push(row.power);
            history.temperature.push(row.temperature);
        }
        Ok(history)
    }
}

struct LogRow {
    timestamp: DateTime<Local>,
    voltage: f64,
    current: f64,
    soc: f64,
    remaining_ah: f64,
    cycles: u16,
    temperature: Option<f64>,
    power: f64,
}

impl LogRow {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 8 {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT).ok()?;
        let timestamp = naive.and_local_timezone(Local).earliest()?;
        Some(Self {
            timestamp,
            voltage: fields[1].parse().ok()?,
            current: fields[2].parse().ok()?,
            soc: fields[3].parse().ok()?,
            remaining_ah: fields[4].parse().ok()?,
            cycles: fields[5].parse().ok()?,
            temperature: fields[6].parse().ok(),
            power: fields[7].parse().ok()?,
        })
    }
}

/// Rebuild a display snapshot from the last row of an existing log.
///
/// Only the logged columns can be recovered; fields the log does not carry
/// (nominal capacity, protection, balance) are defaulted and the ETA is
/// indeterminate until the first live reading replaces the snapshot.
fn last_logged_snapshot(log_path: &Path) -> Option<TelemetrySnapshot> {
    let content = std::fs::read_to_string(log_path).ok()?;
    // The header line does not parse as a row, so it falls out naturally.
    let row = content.lines().rev().find_map(LogRow::parse)?;
    let reading = BasicInfo {
        voltage_v: row.voltage,
        current_a: row.current,
        remaining_ah: row.remaining_ah,
        nominal_ah: 0.0,
        cycles: row.cycles,
        soc_pct: row.soc as u8,
        temperature_c: row.temperature,
        protection: crate::message::ProtectionStatus(0),
        balance: crate::message::BalanceStatus(0),
    };
    Some(TelemetrySnapshot {
        timestamp: row.timestamp,
        power_w: row.power,
        eta: "N/A".to_string(),
        reading,
        cells: None,
    })
}
