//! The BLE transport boundary.
//!
//! The protocol engine never touches `bluest` directly; it drives a
//! [`Transport`] which models the four primitives the BMS link needs:
//! discover, connect, subscribe to notifications, write a request. The
//! production implementation speaks to a JBD/Xiaoxiang BMS, which exposes a
//! UART-style GATT service with separate write and notify characteristics.

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::{pin_mut, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

/// Raw notification chunks, delivered in whatever sizes the link produces.
pub type ChunkReceiver = mpsc::Receiver<Vec<u8>>;

/// The BLE primitives the connection supervisor consumes.
///
/// Every method maps to one supervisor state transition, which keeps the
/// retry contract testable against a scripted implementation.
#[async_trait]
pub trait Transport: Send {
    /// Discover the device, waiting at most `timeout`.
    async fn scan(&mut self, timeout: Duration) -> anyhow::Result<()>;

    /// Connect to the device found by the last successful [`scan`](Self::scan).
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Subscribe to the notification characteristic.
    ///
    /// The returned channel closing signals loss of the notification stream.
    async fn subscribe(&mut self) -> anyhow::Result<ChunkReceiver>;

    /// Fire-and-forget write of a request to the write characteristic.
    async fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()>;

    /// Tear the connection down. Best effort, used between retries.
    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// [`Transport`] implementation over `bluest` for JBD/Xiaoxiang BMS units.
pub struct BleTransport {
    device_name: String,
    adapter: Option<Adapter>,
    device: Option<Device>,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
}

impl BleTransport {
    const SERVICE_ID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);
    const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);
    const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

    /// Size of the chunk buffer between the notification task and the
    /// supervisor. Frames are a few dozen bytes, so this is generous.
    const CHUNK_CHANNEL_CAPACITY: usize = 32;

    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            adapter: None,
            device: None,
            write: None,
            notify: None,
        }
    }

    async fn adapter(&mut self) -> anyhow::Result<&Adapter> {
        if self.adapter.is_none() {
            let adapter = Adapter::default()
                .await
                .ok_or(anyhow!("Default adapter not found"))?;
            adapter.wait_available().await?;
            self.adapter = Some(adapter);
        }
        Ok(self.adapter.as_ref().unwrap())
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> anyhow::Result<Device> {
        let required_services = [Self::SERVICE_ID];
        let mut adapter_events = adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            let device_name = device.device.name_async().await.unwrap_or_default();
            if device_name == name {
                return Ok(device.device);
            }
        }
        Err(anyhow!("scan stream ended before device was found"))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(&mut self, scan_timeout: Duration) -> anyhow::Result<()> {
        let name = self.device_name.clone();
        let adapter = self.adapter().await?;
        let device = timeout(scan_timeout, Self::discover_device(&name, adapter))
            .await
            .map_err(|_| anyhow!("Device {name} not found"))??;
        self.device = Some(device);
        Ok(())
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or(anyhow!("connect before scan"))?;
        let device = self
            .device
            .as_ref()
            .ok_or(anyhow!("connect without a discovered device"))?;
        adapter.connect_device(device).await?;

        let service = device
            .discover_services_with_uuid(Self::SERVICE_ID)
            .await?
            .first()
            .ok_or(anyhow!("The device does not expose the BMS UART service"))?
            .clone();
        self.write = Some(
            service
                .discover_characteristics_with_uuid(Self::WRITE_CHARACTERISTIC_ID)
                .await?
                .first()
                .ok_or(anyhow!("The device does not expose the write characteristic"))?
                .clone(),
        );
        self.notify = Some(
            service
                .discover_characteristics_with_uuid(Self::NOTIFY_CHARACTERISTIC_ID)
                .await?
                .first()
                .ok_or(anyhow!("The device does not expose the notify characteristic"))?
                .clone(),
        );
        Ok(())
    }

    async fn subscribe(&mut self) -> anyhow::Result<ChunkReceiver> {
        let notify = self
            .notify
            .clone()
            .ok_or(anyhow!("subscribe before connect"))?;
        let (tx, rx) = mpsc::channel(Self::CHUNK_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();

        // The notification stream borrows the characteristic, so a task owns
        // both and forwards chunks. Dropping the receiver ends the task.
        tokio::spawn(async move {
            let stream = match notify.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
            };
            pin_mut!(stream);
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(data) => {
                        if tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("notification stream error: {err}");
                        break;
                    }
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| anyhow!("subscription task died"))??;
        Ok(rx)
    }

    async fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let write = self
            .write
            .as_ref()
            .ok_or(anyhow!("write before connect"))?;
        log::debug!("tx: {}", hex::encode(bytes));
        write.write(bytes).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.write = None;
        self.notify = None;
        if let (Some(adapter), Some(device)) = (&self.adapter, self.device.take()) {
            adapter.disconnect_device(&device).await?;
        }
        Ok(())
    }
}
