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

//! Connection state machine for the dongle link.
//!
//! The machine is pure: radio callbacks come in as [`LinkEvent`]s, API calls
//! are plain methods, and every transition returns the [`LinkCommand`]s the
//! transport has to carry out. Nothing here touches the radio or a clock;
//! the caller passes `now` in.
//!
//! ```text
//! Disconnected --connect--> Connecting --link up--> Connected
//!     ^                                                 | service found
//!     |                                                 v
//!     +--- link lost / failure / timeout ---------- Pairing --status ok--> Ready
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ble_constants::{
    config, KEYBOARD_CHAR_UUID, MOUSE_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID,
};
use super::discovery::{DeviceDescriptor, DeviceId, DeviceRegistry};
use crate::hid::ReportChannel;

/// State of the link to the dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Pairing,
    Ready,
}

/// Transport-assigned handle of a remote characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle(pub u16);

/// A characteristic reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: CharacteristicHandle,
}

/// Handles of the three dongle characteristics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicHandles {
    pub keyboard: Option<CharacteristicHandle>,
    pub mouse: Option<CharacteristicHandle>,
    pub status: Option<CharacteristicHandle>,
}

impl CharacteristicHandles {
    pub fn is_empty(&self) -> bool {
        self.keyboard.is_none() && self.mouse.is_none() && self.status.is_none()
    }

    pub fn for_channel(&self, channel: ReportChannel) -> Option<CharacteristicHandle> {
        match channel {
            ReportChannel::Keyboard => self.keyboard,
            ReportChannel::Mouse => self.mouse,
        }
    }
}

/// Radio-side inputs to the machine, one per platform callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Adapter power state changed (or was first reported).
    AdapterPowered(bool),
    /// An advertisement for the dongle service was received.
    Advertisement {
        device: DeviceId,
        name: Option<String>,
    },
    /// The scan ended without being asked to.
    ScanStopped { reason: Option<String> },
    /// The connect request completed.
    LinkEstablished { device: DeviceId, attempt: u64 },
    /// The connect request failed.
    ConnectFailed {
        device: DeviceId,
        attempt: u64,
        reason: String,
    },
    /// An established link went down.
    LinkLost {
        device: DeviceId,
        attempt: u64,
        reason: Option<String>,
    },
    /// Primary service discovery finished.
    ServicesDiscovered {
        device: DeviceId,
        attempt: u64,
        result: Result<Vec<Uuid>, String>,
    },
    /// Characteristic discovery on the dongle service finished.
    CharacteristicsDiscovered {
        device: DeviceId,
        attempt: u64,
        result: Result<Vec<DiscoveredCharacteristic>, String>,
    },
    /// Read of the status characteristic finished.
    StatusProbed {
        device: DeviceId,
        attempt: u64,
        result: Result<(), String>,
    },
}

/// Radio operations requested by the machine.
///
/// Link-level commands carry the connect attempt they belong to. The
/// transport echoes it in the matching [`LinkEvent`] so callbacks from an
/// abandoned attempt can be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartScan,
    StopScan,
    Connect {
        device: DeviceId,
        attempt: u64,
    },
    Disconnect {
        device: DeviceId,
        attempt: u64,
    },
    DiscoverServices {
        device: DeviceId,
        attempt: u64,
    },
    DiscoverCharacteristics {
        device: DeviceId,
        attempt: u64,
    },
    ProbeStatus {
        device: DeviceId,
        attempt: u64,
        handle: CharacteristicHandle,
    },
}

/// Liveness and handshake bounds. `None` disables a handshake timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub device: Duration,
    pub connect: Option<Duration>,
    pub pairing: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            device: config::DEVICE_TIMEOUT,
            connect: Some(config::CONNECT_TIMEOUT),
            pairing: Some(config::PAIRING_TIMEOUT),
        }
    }
}

/// Observable view of the machine for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub powered: bool,
    pub scanning: bool,
    pub state: ConnectionState,
    pub active: Option<DeviceDescriptor>,
    pub discovered: Vec<DeviceDescriptor>,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            powered: false,
            scanning: false,
            state: ConnectionState::Disconnected,
            active: None,
            discovered: Vec::new(),
        }
    }
}

pub struct LinkStateMachine {
    state: ConnectionState,
    powered: bool,
    scanning: bool,
    registry: DeviceRegistry,
    active: Option<DeviceDescriptor>,
    handles: CharacteristicHandles,
    /// Bumped by every connect.
    attempt: u64,
    /// When the current handshake phase began (connect, or link-up).
    phase_started: Option<Instant>,
    timeouts: Timeouts,
}

impl LinkStateMachine {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            powered: false,
            scanning: false,
            registry: DeviceRegistry::new(),
            active: None,
            handles: CharacteristicHandles::default(),
            attempt: 0,
            phase_started: None,
            timeouts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn active(&self) -> Option<&DeviceDescriptor> {
        self.active.as_ref()
    }

    /// Generation of the most recent connect attempt.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn handles(&self) -> &CharacteristicHandles {
        &self.handles
    }

    pub fn discovered(&self) -> &[DeviceDescriptor] {
        self.registry.devices()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            powered: self.powered,
            scanning: self.scanning,
            state: self.state,
            active: self.active.clone(),
            discovered: self.registry.devices().to_vec(),
        }
    }

    /// Where a report for `channel` has to be written, if the link is ready.
    pub fn write_target(
        &self,
        channel: ReportChannel,
    ) -> Option<(DeviceId, CharacteristicHandle)> {
        if self.state != ConnectionState::Ready {
            return None;
        }
        let device = self.active.as_ref()?.id.clone();
        let handle = self.handles.for_channel(channel)?;
        Some((device, handle))
    }

    /// Begin scanning with an empty discovered set.
    ///
    /// Ignored (logged only) while the adapter is not powered.
    pub fn start_scanning(&mut self) -> Vec<LinkCommand> {
        if !self.powered {
            info!("Bluetooth is not powered on, not scanning");
            return Vec::new();
        }
        info!("Starting scan");
        self.registry.clear();
        self.scanning = true;
        vec![LinkCommand::StartScan]
    }

    pub fn stop_scanning(&mut self) -> Vec<LinkCommand> {
        info!("Stopping scan");
        self.scanning = false;
        vec![LinkCommand::StopScan]
    }

    /// Connect to `device`, stopping any scan in progress.
    ///
    /// # Preconditions
    /// The machine must be [`ConnectionState::Disconnected`]. This is the
    /// caller's responsibility and is not checked here.
    pub fn connect(&mut self, device: DeviceId, now: Instant) -> Vec<LinkCommand> {
        info!("Connecting to peripheral: {}", device);
        let descriptor = self
            .registry
            .get(&device)
            .cloned()
            .unwrap_or_else(|| DeviceDescriptor {
                id: device.clone(),
                name: None,
                last_seen: now,
            });

        self.attempt = self.attempt.wrapping_add(1);
        self.active = Some(descriptor);
        self.state = ConnectionState::Connecting;
        self.phase_started = Some(now);

        let mut commands = vec![LinkCommand::Connect {
            device,
            attempt: self.attempt,
        }];
        if self.scanning {
            self.scanning = false;
            commands.push(LinkCommand::StopScan);
        }
        commands
    }

    /// Request termination of the active link.
    ///
    /// The state only changes once the transport reports
    /// [`LinkEvent::LinkLost`] (or [`LinkEvent::ConnectFailed`]). Without an
    /// active device this does nothing.
    pub fn disconnect(&mut self) -> Vec<LinkCommand> {
        match &self.active {
            Some(device) => {
                info!("Disconnecting from peripheral: {}", device.id);
                vec![LinkCommand::Disconnect {
                    device: device.id.clone(),
                    attempt: self.attempt,
                }]
            }
            None => {
                debug!("Disconnect requested with no active device");
                Vec::new()
            }
        }
    }

    /// Periodic housekeeping: liveness pruning and handshake timeouts.
    pub fn tick(&mut self, now: Instant) -> Vec<LinkCommand> {
        if self.scanning {
            let removed = self.registry.prune(now, self.timeouts.device);
            if removed > 0 {
                debug!("Pruned {} stale device(s)", removed);
            }
        }

        let limit = match self.state {
            ConnectionState::Connecting => self.timeouts.connect,
            ConnectionState::Connected | ConnectionState::Pairing => self.timeouts.pairing,
            ConnectionState::Disconnected | ConnectionState::Ready => None,
        };
        match (limit, self.phase_started) {
            (Some(limit), Some(started)) if now.saturating_duration_since(started) > limit => {
                let reason = format!("{:?} timed out after {:?}", self.state, limit);
                self.abort(&reason)
            }
            _ => Vec::new(),
        }
    }

    /// Feed one radio callback through the transition table.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) -> Vec<LinkCommand> {
        match event {
            LinkEvent::AdapterPowered(powered) => {
                info!("Adapter powered: {}", powered);
                self.powered = powered;
                if !powered {
                    self.scanning = false;
                }
                Vec::new()
            }
            LinkEvent::Advertisement { device, name } => {
                if self.scanning {
                    self.registry.record_sighting(device, name, now);
                }
                Vec::new()
            }
            LinkEvent::ScanStopped { reason } => {
                if self.scanning {
                    warn!(
                        "Scan stopped: {}",
                        reason.as_deref().unwrap_or("discovery ended")
                    );
                    self.scanning = false;
                }
                Vec::new()
            }
            LinkEvent::LinkEstablished { device, attempt } => {
                if !self.expects(&device, attempt, ConnectionState::Connecting) {
                    return Vec::new();
                }
                info!("Connected to peripheral: {}", device);
                self.state = ConnectionState::Connected;
                self.phase_started = Some(now);
                vec![LinkCommand::DiscoverServices { device, attempt }]
            }
            LinkEvent::ConnectFailed {
                device,
                attempt,
                reason,
            } => {
                if self.is_current(&device, attempt) {
                    warn!("Failed to connect to peripheral {}: {}", device, reason);
                    self.reset();
                } else {
                    debug!("Ignoring connect failure from stale attempt {}", attempt);
                }
                Vec::new()
            }
            LinkEvent::LinkLost {
                device,
                attempt,
                reason,
            } => {
                if self.is_current(&device, attempt) {
                    info!(
                        "Disconnected from peripheral {} ({})",
                        device,
                        reason.as_deref().unwrap_or("link lost")
                    );
                    self.reset();
                } else {
                    debug!("Ignoring link loss from stale attempt {}", attempt);
                }
                Vec::new()
            }
            LinkEvent::ServicesDiscovered {
                device,
                attempt,
                result,
            } => {
                if !self.expects(&device, attempt, ConnectionState::Connected) {
                    return Vec::new();
                }
                match result {
                    Ok(services) if services.contains(&SERVICE_UUID) => {
                        debug!("Discovered service: {}", SERVICE_UUID);
                        self.state = ConnectionState::Pairing;
                        vec![LinkCommand::DiscoverCharacteristics { device, attempt }]
                    }
                    Ok(_) => self.abort("dongle service not offered"),
                    Err(e) => self.abort(&format!("service discovery failed: {}", e)),
                }
            }
            LinkEvent::CharacteristicsDiscovered {
                device,
                attempt,
                result,
            } => {
                if !self.expects(&device, attempt, ConnectionState::Pairing) {
                    return Vec::new();
                }
                let characteristics = match result {
                    Ok(characteristics) => characteristics,
                    Err(e) => return self.abort(&format!("characteristic discovery failed: {}", e)),
                };
                for characteristic in characteristics {
                    debug!("Discovered characteristic: {}", characteristic.uuid);
                    let slot = match characteristic.uuid {
                        uuid if uuid == KEYBOARD_CHAR_UUID => &mut self.handles.keyboard,
                        uuid if uuid == MOUSE_CHAR_UUID => &mut self.handles.mouse,
                        uuid if uuid == STATUS_CHAR_UUID => &mut self.handles.status,
                        _ => continue,
                    };
                    *slot = Some(characteristic.handle);
                }

                match self.handles {
                    CharacteristicHandles {
                        keyboard: Some(_),
                        mouse: Some(_),
                        status: Some(status),
                    } => vec![LinkCommand::ProbeStatus {
                        device,
                        attempt,
                        handle: status,
                    }],
                    handles => self.abort(&format!("required characteristic missing: {:?}", handles)),
                }
            }
            LinkEvent::StatusProbed {
                device,
                attempt,
                result,
            } => {
                if !self.expects(&device, attempt, ConnectionState::Pairing) {
                    return Vec::new();
                }
                match result {
                    Ok(()) if self.handles.keyboard.is_some() && self.handles.mouse.is_some() => {
                        info!("Secure pairing complete, link ready");
                        self.state = ConnectionState::Ready;
                        self.phase_started = None;
                        Vec::new()
                    }
                    Ok(()) => {
                        warn!("Status readable but report characteristics missing");
                        Vec::new()
                    }
                    // A failed bonding handshake does not recover on its own.
                    Err(e) => self.abort(&format!("error reading status characteristic: {}", e)),
                }
            }
        }
    }

    /// Whether a callback belongs to the link currently being driven.
    fn is_current(&self, device: &DeviceId, attempt: u64) -> bool {
        attempt == self.attempt && self.active.as_ref().is_some_and(|d| &d.id == device)
    }

    fn expects(&self, device: &DeviceId, attempt: u64, state: ConnectionState) -> bool {
        let expected = self.is_current(device, attempt) && self.state == state;
        if !expected {
            debug!(
                "Ignoring late callback from {} attempt {} (state {:?}, expected {:?})",
                device, attempt, self.state, state
            );
        }
        expected
    }

    /// Give up on the active link: ask the transport to drop it and go
    /// straight back to `Disconnected`.
    fn abort(&mut self, reason: &str) -> Vec<LinkCommand> {
        warn!("Aborting connection: {}", reason);
        let commands = self
            .active
            .as_ref()
            .map(|device| LinkCommand::Disconnect {
                device: device.id.clone(),
                attempt: self.attempt,
            })
            .into_iter()
            .collect();
        self.reset();
        commands
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.active = None;
        self.handles = CharacteristicHandles::default();
        self.phase_started = None;
    }
}
