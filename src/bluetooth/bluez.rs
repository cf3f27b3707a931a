// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ central transport built on `bluer`.
//!
//! Every [`LinkCommand`] is carried out on a spawned task and its outcome is
//! reported back as a [`LinkEvent`]. Report writes go through a single
//! writer task so they reach the radio in queue order.

use anyhow::{anyhow, Context, Result};
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest, Service};
use bluer::gatt::WriteOp;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument, Span};

use super::ble_constants::SERVICE_UUID;
use super::discovery::DeviceId;
use super::state_machine::{
    CharacteristicHandle, DiscoveredCharacteristic, LinkCommand, LinkEvent,
};
use super::transport::{EventSender, Transport};

/// How often the adapter power state is polled.
const POWER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How often a connected device is checked for link loss.
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval and bound while waiting for BlueZ to resolve services.
const SERVICE_RESOLVE_POLL: Duration = Duration::from_millis(100);
const SERVICE_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

struct ReportWrite {
    device: DeviceId,
    handle: CharacteristicHandle,
    payload: Vec<u8>,
}

/// GATT objects of the active link.
#[derive(Default)]
struct LinkObjects {
    /// Latest connect attempt handed to the transport. Results of older
    /// attempts are not stored.
    attempt: u64,
    service: Option<Service>,
    characteristics: HashMap<u16, Characteristic>,
    monitor: Option<JoinHandle<()>>,
}

impl LinkObjects {
    fn clear(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.service = None;
        self.characteristics.clear();
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt
    }
}

pub struct BluezTransport {
    // Keeps the D-Bus connection alive.
    _session: bluer::Session,
    adapter: Adapter,
    event_tx: EventSender,
    write_tx: mpsc::UnboundedSender<ReportWrite>,
    link: Arc<Mutex<LinkObjects>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    power_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    span: Span,
}

impl BluezTransport {
    /// Open a BlueZ session on the default adapter. Every task the
    /// transport spawns runs inside `span`.
    pub async fn new(event_tx: EventSender, power_on: bool, span: Span) -> Result<Self> {
        info!(parent: &span, "Initializing BLE central...");

        let session = bluer::Session::new()
            .await
            .context("Failed to open BlueZ session")?;
        let adapter = session
            .default_adapter()
            .await
            .context("No Bluetooth adapter available")?;
        info!(parent: &span, "Using Bluetooth adapter: {}", adapter.name());

        if power_on && !adapter.is_powered().await? {
            info!(parent: &span, "Powering on Bluetooth adapter...");
            adapter
                .set_powered(true)
                .await
                .context("Failed to power on adapter")?;
        }

        let link = Arc::new(Mutex::new(LinkObjects::default()));
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer_task = spawn_in(&span, write_loop(write_rx, link.clone()));
        let power_task = spawn_in(&span, power_monitor(adapter.clone(), event_tx.clone()));

        Ok(Self {
            _session: session,
            adapter,
            event_tx,
            write_tx,
            link,
            scan_task: Mutex::new(None),
            power_task,
            writer_task,
            span,
        })
    }

    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        spawn_in(&self.span, future)
    }

    fn start_scan(&self) {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let task = self.spawn(async move {
            let reason = match scan(adapter, event_tx.clone()).await {
                Ok(()) => None,
                Err(e) => Some(format!("{:#}", e)),
            };
            // Only reached when discovery ends on its own; stop_scan aborts.
            let _ = event_tx.send(LinkEvent::ScanStopped { reason }).await;
        });
        if let Some(previous) = self.scan_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_scan(&self) {
        // Dropping the discovery stream ends the BlueZ discovery session.
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
            debug!("BLE scan stopped");
        }
    }

    fn connect(&self, id: DeviceId, attempt: u64) {
        self.link.lock().attempt = attempt;
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let link = self.link.clone();
        let span = self.span.clone();

        self.spawn(async move {
            let outcome = async {
                let device = adapter.device(parse_address(&id)?)?;
                device.connect().await?;
                Ok::<_, anyhow::Error>(device)
            }
            .await;

            let event = match outcome {
                Ok(device) => {
                    let mut link = link.lock();
                    if link.is_current(attempt) {
                        let monitor = link_monitor(device, id.clone(), attempt, event_tx.clone());
                        link.clear();
                        link.monitor = Some(spawn_in(&span, monitor));
                    } else {
                        debug!("Connect attempt {} to {} superseded", attempt, id);
                    }
                    LinkEvent::LinkEstablished {
                        device: id,
                        attempt,
                    }
                }
                Err(e) => LinkEvent::ConnectFailed {
                    device: id,
                    attempt,
                    reason: e.to_string(),
                },
            };
            let _ = event_tx.send(event).await;
        });
    }

    fn disconnect(&self, id: DeviceId, attempt: u64) {
        {
            let mut link = self.link.lock();
            if link.is_current(attempt) {
                link.clear();
            }
        }
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();

        self.spawn(async move {
            let outcome = async {
                let device = adapter.device(parse_address(&id)?)?;
                device.disconnect().await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = outcome {
                warn!("Disconnect from {} reported: {}", id, e);
            }
            // The link monitor is gone, so report the loss here.
            let _ = event_tx
                .send(LinkEvent::LinkLost {
                    device: id,
                    attempt,
                    reason: Some("disconnect requested".to_string()),
                })
                .await;
        });
    }

    fn discover_services(&self, id: DeviceId, attempt: u64) {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let link = self.link.clone();

        self.spawn(async move {
            let result = match resolve_services(&adapter, &id).await {
                Ok((uuids, dongle_service)) => {
                    let mut link = link.lock();
                    if link.is_current(attempt) {
                        link.service = dongle_service;
                    }
                    Ok(uuids)
                }
                Err(e) => Err(format!("{:#}", e)),
            };
            let _ = event_tx
                .send(LinkEvent::ServicesDiscovered {
                    device: id,
                    attempt,
                    result,
                })
                .await;
        });
    }

    fn discover_characteristics(&self, id: DeviceId, attempt: u64) {
        let event_tx = self.event_tx.clone();
        let link = self.link.clone();

        self.spawn(async move {
            let service = link.lock().service.clone();
            let result = match service {
                Some(service) => match list_characteristics(&service).await {
                    Ok(characteristics) => {
                        let found = characteristics
                            .iter()
                            .map(|(uuid, ch)| DiscoveredCharacteristic {
                                uuid: *uuid,
                                handle: CharacteristicHandle(ch.id()),
                            })
                            .collect();
                        let mut link = link.lock();
                        if link.is_current(attempt) {
                            link.characteristics = characteristics
                                .into_iter()
                                .map(|(_, ch)| (ch.id(), ch))
                                .collect();
                        }
                        Ok(found)
                    }
                    Err(e) => Err(format!("{:#}", e)),
                },
                None => Err("dongle service not resolved".to_string()),
            };
            let _ = event_tx
                .send(LinkEvent::CharacteristicsDiscovered {
                    device: id,
                    attempt,
                    result,
                })
                .await;
        });
    }

    fn read_status(&self, id: DeviceId, attempt: u64, handle: CharacteristicHandle) {
        let event_tx = self.event_tx.clone();
        let characteristic = self.link.lock().characteristics.get(&handle.0).cloned();

        self.spawn(async move {
            let result = match characteristic {
                // Reading an encrypted characteristic triggers bonding.
                Some(characteristic) => match characteristic.read().await {
                    Ok(value) => {
                        debug!("Status characteristic: {}", hex::encode(&value));
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                },
                None => Err(format!("unknown characteristic {:#06x}", handle.0)),
            };
            let _ = event_tx
                .send(LinkEvent::StatusProbed {
                    device: id,
                    attempt,
                    result,
                })
                .await;
        });
    }
}

impl Transport for BluezTransport {
    fn execute(&self, command: LinkCommand) {
        match command {
            LinkCommand::StartScan => self.start_scan(),
            LinkCommand::StopScan => self.stop_scan(),
            LinkCommand::Connect { device, attempt } => self.connect(device, attempt),
            LinkCommand::Disconnect { device, attempt } => self.disconnect(device, attempt),
            LinkCommand::DiscoverServices { device, attempt } => {
                self.discover_services(device, attempt)
            }
            LinkCommand::DiscoverCharacteristics { device, attempt } => {
                self.discover_characteristics(device, attempt)
            }
            LinkCommand::ProbeStatus {
                device,
                attempt,
                handle,
            } => self.read_status(device, attempt, handle),
        }
    }

    fn write_without_response(
        &self,
        device: &DeviceId,
        handle: CharacteristicHandle,
        payload: Vec<u8>,
    ) {
        let write = ReportWrite {
            device: device.clone(),
            handle,
            payload,
        };
        if self.write_tx.send(write).is_err() {
            warn!(parent: &self.span, "Report writer stopped, dropping write");
        }
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        self.stop_scan();
        self.link.lock().clear();
        self.power_task.abort();
        self.writer_task.abort();
    }
}

/// Spawn `future` inside `span`; spawned tasks do not inherit the caller's.
fn spawn_in<F>(span: &Span, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.instrument(span.clone()))
}

fn parse_address(id: &DeviceId) -> Result<Address> {
    id.as_str()
        .parse()
        .map_err(|_| anyhow!("Invalid device address: {}", id))
}

async fn power_monitor(adapter: Adapter, event_tx: EventSender) {
    let mut last = None;
    loop {
        match adapter.is_powered().await {
            Ok(powered) if last != Some(powered) => {
                last = Some(powered);
                if event_tx.send(LinkEvent::AdapterPowered(powered)).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Failed to query adapter power: {}", e),
        }
        tokio::time::sleep(POWER_POLL_INTERVAL).await;
    }
}

async fn scan(adapter: Adapter, event_tx: EventSender) -> Result<()> {
    let filter = DiscoveryFilter {
        uuids: HashSet::from([SERVICE_UUID]),
        transport: DiscoveryTransport::Le,
        // Every advertisement, so liveness stays fresh.
        duplicate_data: true,
        ..Default::default()
    };
    adapter
        .set_discovery_filter(filter)
        .await
        .context("Failed to set discovery filter")?;

    let events = adapter
        .discover_devices_with_changes()
        .await
        .context("Failed to start discovery")?;
    pin_mut!(events);
    info!("BLE scan started");

    while let Some(event) = events.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        match advertisement(&adapter, address).await {
            Ok(Some(event)) => {
                if event_tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            // Typically the device vanished between the signal and the query.
            Err(e) => debug!("Skipping {}: {}", address, e),
        }
    }
    Err(anyhow!("discovery stream ended"))
}

/// The advertisement event for `address`, if it is a dongle heard just now.
async fn advertisement(adapter: &Adapter, address: Address) -> Result<Option<LinkEvent>> {
    let device = adapter.device(address)?;

    // Cached devices are replayed on discovery start without an RSSI.
    if device.rssi().await?.is_none() {
        return Ok(None);
    }
    let advertises_service = device
        .uuids()
        .await?
        .is_some_and(|uuids| uuids.contains(&SERVICE_UUID));
    if !advertises_service {
        return Ok(None);
    }

    let name = device.name().await.ok().flatten();
    trace!("Advertisement from {} ({:?})", address, name);
    Ok(Some(LinkEvent::Advertisement {
        device: DeviceId::new(address.to_string()),
        name,
    }))
}

async fn link_monitor(device: bluer::Device, id: DeviceId, attempt: u64, event_tx: EventSender) {
    loop {
        tokio::time::sleep(LINK_POLL_INTERVAL).await;
        match device.is_connected().await {
            Ok(true) => continue,
            Ok(false) => {
                info!("BLE device {} disconnected", id);
                break;
            }
            Err(e) => {
                warn!("Failed to query connection state for {}: {}", id, e);
                break;
            }
        }
    }
    let _ = event_tx
        .send(LinkEvent::LinkLost {
            device: id,
            attempt,
            reason: None,
        })
        .await;
}

async fn resolve_services(
    adapter: &Adapter,
    id: &DeviceId,
) -> Result<(Vec<uuid::Uuid>, Option<Service>)> {
    let device = adapter.device(parse_address(id)?)?;

    tokio::time::timeout(SERVICE_RESOLVE_TIMEOUT, async {
        while !device.is_services_resolved().await? {
            tokio::time::sleep(SERVICE_RESOLVE_POLL).await;
        }
        Ok::<_, bluer::Error>(())
    })
    .await
    .context("Timed out resolving services")??;

    let mut uuids = Vec::new();
    let mut dongle_service = None;
    for service in device.services().await? {
        let uuid = service.uuid().await?;
        if uuid == SERVICE_UUID {
            dongle_service = Some(service);
        }
        uuids.push(uuid);
    }
    Ok((uuids, dongle_service))
}

async fn list_characteristics(service: &Service) -> Result<Vec<(uuid::Uuid, Characteristic)>> {
    let mut found = Vec::new();
    for characteristic in service.characteristics().await? {
        let uuid = characteristic.uuid().await?;
        found.push((uuid, characteristic));
    }
    Ok(found)
}

async fn write_loop(mut writes: mpsc::UnboundedReceiver<ReportWrite>, link: Arc<Mutex<LinkObjects>>) {
    let request = CharacteristicWriteRequest {
        op_type: WriteOp::Command,
        ..Default::default()
    };

    while let Some(write) = writes.recv().await {
        let characteristic = link.lock().characteristics.get(&write.handle.0).cloned();
        let Some(characteristic) = characteristic else {
            debug!(
                "Dropping write to unknown characteristic {:#06x}",
                write.handle.0
            );
            continue;
        };
        if let Err(e) = characteristic.write_ext(&write.payload, &request).await {
            warn!("Report write to {} failed: {}", write.device, e);
        }
    }
    debug!("Report writer stopped");
}
