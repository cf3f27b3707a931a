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

//! Bookkeeping for peripherals seen during a scan.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Opaque, stable peripheral identifier assigned by the platform stack
/// (a BlueZ device address, for example).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral advertising the dongle service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub name: Option<String>,
    pub last_seen: Instant,
}

impl DeviceDescriptor {
    /// Name for display, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Discovered-device set with liveness expiry.
///
/// Holds at most one entry per [`DeviceId`], in first-seen order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement sighting.
    ///
    /// Returns `true` if the device was not in the set before.
    pub fn record_sighting(&mut self, id: DeviceId, name: Option<String>, now: Instant) -> bool {
        if let Some(device) = self.devices.iter_mut().find(|d| d.id == id) {
            device.last_seen = now;
            // Names often only arrive in the scan response.
            if name.is_some() {
                device.name = name;
            }
            return false;
        }

        debug!(
            "Discovered device {} ({})",
            id,
            name.as_deref().unwrap_or("unnamed")
        );
        self.devices.push(DeviceDescriptor {
            id,
            name,
            last_seen: now,
        });
        true
    }

    /// Drop every device whose last sighting is older than `timeout`.
    ///
    /// Returns the number of devices removed.
    pub fn prune(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.devices.len();
        self.devices.retain(|device| {
            let stale = now.saturating_duration_since(device.last_seen) > timeout;
            if stale {
                debug!("Device {} timed out", device.id);
            }
            !stale
        });
        before - self.devices.len()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn first(&self) -> Option<&DeviceDescriptor> {
        self.devices.first()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
