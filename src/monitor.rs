//! The connection supervisor: owns the BLE session lifecycle and drives the
//! decode pipeline.
//!
//! The supervisor cycles `Scanning → Connecting → Subscribed → Polling` and
//! falls back through `Disconnected → BackoffWait → Scanning` on any
//! transport error. Framing, decode and validation errors never reach it;
//! those are handled inside the pipeline and the next poll cycle simply
//! requests fresh data. Only a run of consecutive transport failures is
//! fatal: once the budget is exhausted the supervisor parks in `Failed`
//! and reports it, leaving restart to the operator.

use crate::config::Config;
use crate::frame::FrameAssembler;
use crate::message::{Message, REQ_BASIC_INFO, REQ_CELL_VOLTAGES};
use crate::metrics;
use crate::store::TelemetryStore;
use crate::transport::{ChunkReceiver, Transport};
use crate::validate::Validator;
use anyhow::{anyhow, Context};
use serde::Serialize;
use std::convert::Infallible;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};

/// Where the supervisor currently is in the connection lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Subscribed,
    Polling,
    Disconnected(String),
    BackoffWait,
    /// Terminal: the consecutive-failure budget is exhausted.
    Failed,
}

/// Polls the BMS and feeds accepted telemetry into the store.
pub struct Monitor<T: Transport> {
    transport: T,
    config: Config,
    store: TelemetryStore,
    assembler: FrameAssembler,
    validator: Validator,
}

impl<T: Transport> Monitor<T> {
    pub fn new(transport: T, config: Config, store: TelemetryStore) -> Self {
        Self {
            transport,
            config,
            store,
            assembler: FrameAssembler::new(),
            validator: Validator::new(),
        }
    }

    /// Run until the consecutive-failure budget is exhausted.
    ///
    /// Each pass of the loop is one connection attempt; a session that
    /// reaches `Subscribed` resets the budget.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut consecutive_failures: u32 = 0;
        loop {
            let err = match self.session(&mut consecutive_failures).await {
                Err(err) => err,
                Ok(never) => match never {},
            };
            consecutive_failures += 1;
            log::warn!(
                "connection lost ({consecutive_failures}/{} failures): {err:#}",
                self.config.max_consecutive_failures
            );
            self.set_state(ConnectionState::Disconnected(format!("{err:#}")));

            // In-flight buffer state is meaningless across sessions.
            self.assembler.reset();
            if let Err(err) = self.transport.disconnect().await {
                log::debug!("disconnect after failure: {err:#}");
            }

            if consecutive_failures >= self.config.max_consecutive_failures {
                self.set_state(ConnectionState::Failed);
                return Err(err.context("consecutive-failure budget exhausted"));
            }

            self.set_state(ConnectionState::BackoffWait);
            sleep(self.config.backoff()).await;
        }
    }

    /// One full session: discover, connect, subscribe, then poll until the
    /// transport fails. Never returns `Ok`.
    async fn session(&mut self, consecutive_failures: &mut u32) -> anyhow::Result<Infallible> {
        self.set_state(ConnectionState::Scanning);
        self.transport
            .scan(self.config.scan_timeout())
            .await
            .context("device discovery")?;

        self.set_state(ConnectionState::Connecting);
        self.transport.connect().await.context("connect")?;

        let mut chunks = self.transport.subscribe().await.context("subscribe")?;
        *consecutive_failures = 0;
        self.set_state(ConnectionState::Subscribed);
        log::info!("subscribed to {}", self.config.device_name);

        self.set_state(ConnectionState::Polling);
        self.poll(&mut chunks).await
    }

    /// Steady state: request both records every poll interval while pumping
    /// notifications through the pipeline.
    ///
    /// Requests are fire-and-forget; responses arrive whenever the BMS gets
    /// around to notifying, so request cadence and response handling are
    /// fully decoupled.
    async fn poll(&mut self, chunks: &mut ChunkReceiver) -> anyhow::Result<Infallible> {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let received = tokio::select! {
                _ = ticker.tick() => None,
                chunk = chunks.recv() => Some(chunk),
            };
            match received {
                None => {
                    self.transport.write(&REQ_BASIC_INFO).await.context("basic info request")?;
                    self.settle(chunks).await?;
                    self.transport.write(&REQ_CELL_VOLTAGES).await.context("cell voltage request")?;
                    self.settle(chunks).await?;
                }
                Some(chunk) => {
                    let chunk = chunk.ok_or(anyhow!("notification stream closed"))?;
                    self.ingest(&chunk);
                }
            }
        }
    }

    /// Give the BMS time to answer the previous request, without dropping
    /// notifications that arrive meanwhile.
    async fn settle(&mut self, chunks: &mut ChunkReceiver) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.settle_delay();
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Ok(()),
                chunk = chunks.recv() => {
                    let chunk = chunk.ok_or(anyhow!("notification stream closed"))?;
                    self.ingest(&chunk);
                }
            }
        }
    }

    /// Push one notification chunk through assembler, decoder, validator
    /// and on into the store. Nothing in here can fail the session.
    fn ingest(&mut self, chunk: &[u8]) {
        log::debug!("rx: {}", hex::encode(chunk));
        for frame in self.assembler.feed(chunk) {
            match Message::decode(&frame) {
                Ok(Message::BasicInfo(reading)) => match self.validator.check(&reading) {
                    Ok(()) => {
                        log::info!(
                            "V:{:.2}V I:{:+.2}A SOC:{}% P:{:.1}W ETA:{}",
                            reading.voltage_v,
                            reading.current_a,
                            reading.soc_pct,
                            metrics::power_w(&reading),
                            metrics::eta_string(&reading),
                        );
                        self.store.accept_reading(reading, self.validator.stats());
                    }
                    Err(rejection) => {
                        log::warn!("rejected reading: {rejection}");
                        self.store.set_stats(self.validator.stats().clone());
                    }
                },
                Ok(Message::CellVoltages(cells)) => self.store.accept_cells(cells),
                Err(err) => log::warn!("discarding frame: {err}"),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        log::debug!("connection state: {state:?}");
        self.store.set_connection(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::make_frame;
    use crate::message::{CMD_BASIC_INFO, CMD_CELL_VOLTAGES};
    use crate::store::StoreReader;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    fn test_config() -> Config {
        Config {
            max_consecutive_failures: 10,
            backoff_secs: 0,
            poll_interval_secs: 60,
            settle_delay_ms: 0,
            ..Config::default()
        }
    }

    fn test_store() -> (TelemetryStore, StoreReader, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (store, reader) = TelemetryStore::open(&dir.path().join("log.csv"));
        (store, reader, dir)
    }

    /// Scan never succeeds; counts attempts.
    struct UnreachableDevice {
        scans: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for UnreachableDevice {
        async fn scan(&mut self, _timeout: Duration) -> anyhow::Result<()> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("device not found"))
        }
        async fn connect(&mut self) -> anyhow::Result<()> {
            unreachable!("connect without successful scan")
        }
        async fn subscribe(&mut self) -> anyhow::Result<ChunkReceiver> {
            unreachable!("subscribe without successful scan")
        }
        async fn write(&mut self, _bytes: &[u8]) -> anyhow::Result<()> {
            unreachable!("write without successful scan")
        }
        async fn disconnect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_budget_leads_to_failed_state() {
        let scans = Arc::new(AtomicU32::new(0));
        let (store, reader, _dir) = test_store();
        let mut monitor = Monitor::new(
            UnreachableDevice {
                scans: scans.clone(),
            },
            test_config(),
            store,
        );

        let result = monitor.run().await;
        assert!(result.is_err());
        assert_eq!(scans.load(Ordering::SeqCst), 10);
        assert_eq!(reader.latest().connection, ConnectionState::Failed);
    }

    /// Connects once, replays scripted notification chunks, then the stream
    /// closes; every retry after that fails at scan.
    struct ScriptedDevice {
        chunks: Vec<Vec<u8>>,
        sessions: u32,
        writes: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl Transport for ScriptedDevice {
        async fn scan(&mut self, _timeout: Duration) -> anyhow::Result<()> {
            if self.sessions > 0 {
                return Err(anyhow!("device gone"));
            }
            Ok(())
        }
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn subscribe(&mut self) -> anyhow::Result<ChunkReceiver> {
            self.sessions += 1;
            let (tx, rx) = mpsc::channel(8);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                // Hold the channel open past the first poll cycle, then
                // drop the sender: the stream closes and the session ends.
                tokio::time::sleep(Duration::from_secs(120)).await;
            });
            Ok(rx)
        }
        async fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
        async fn disconnect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_session_flows_into_store() {
        let basic = make_frame(CMD_BASIC_INFO, &crate::message::basic_info_test_payload());
        let cells = make_frame(CMD_CELL_VOLTAGES, &[0x0C, 0xE4, 0x0C, 0xE9]);

        // Split the basic info frame mid-payload to exercise reassembly.
        let (first, second) = basic.split_at(10);
        let writes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let transport = ScriptedDevice {
            chunks: vec![first.to_vec(), second.to_vec(), cells],
            sessions: 0,
            writes: writes.clone(),
        };

        let mut config = test_config();
        config.max_consecutive_failures = 1;
        let (store, reader, _dir) = test_store();
        let mut monitor = Monitor::new(transport, config, store);

        // Ends in Failed once the scripted chunks run out and rescans fail.
        assert!(monitor.run().await.is_err());

        let state = reader.latest();
        assert_eq!(state.stats.accepted, 1);
        let snapshot = state.snapshot.unwrap();
        assert_eq!(snapshot.reading.voltage_v, 13.0);
        assert_eq!(snapshot.reading.soc_pct, 50);
        assert_eq!(snapshot.cells.unwrap().cells_v, vec![3.3, 3.305]);

        let writes = writes.lock().unwrap();
        assert_eq!(writes[0], REQ_BASIC_INFO.to_vec());
        assert_eq!(writes[1], REQ_CELL_VOLTAGES.to_vec());
    }
}
