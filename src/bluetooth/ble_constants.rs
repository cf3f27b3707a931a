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

//! GATT contract exposed by the HID dongle.

use uuid::Uuid;

/// Primary service advertised by the dongle.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Keyboard reports (write without response, 7 bytes).
pub const KEYBOARD_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Mouse reports (write without response, 3 or 5 bytes).
pub const MOUSE_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a9);

/// Pairing probe (read/notify). Only success vs. error matters; the first
/// encrypted access triggers bonding on the host.
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26aa);

/// Timing defaults.
pub mod config {
    use std::time::Duration;

    /// A discovered device not re-sighted for this long is dropped.
    pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Liveness pruning period.
    pub const LIVENESS_TICK: Duration = Duration::from_secs(1);

    /// Report drain period (200 Hz).
    pub const DRAIN_INTERVAL: Duration = Duration::from_millis(5);

    /// Upper bound on `Connecting`.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Upper bound on service discovery plus pairing.
    pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

    /// Report queue bound.
    pub const QUEUE_CAPACITY: usize = 4096;
}
