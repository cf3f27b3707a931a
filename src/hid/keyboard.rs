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

//! Keyboard report written to the dongle's keyboard characteristic.
//!
//! Layout (7 bytes):
//! ```text
//! Byte 0:   Modifier bitfield
//!           Bit 0 = Left Ctrl,  Bit 1 = Left Shift,
//!           Bit 2 = Left Alt,   Bit 3 = Left Meta,
//!           Bit 4 = Right Ctrl, Bit 5 = Right Shift,
//!           Bit 6 = Right Alt,  Bit 7 = Right Meta
//! Byte 1-6: Up to 6 held key usages, zero padded
//! ```
//!
//! There is no reserved byte; the dongle re-inserts it when it builds the
//! USB boot report.

/// Maximum number of simultaneously held non-modifier keys.
pub const MAX_KEYS: usize = 6;

/// Keyboard report size in bytes.
pub const KEYBOARD_REPORT_SIZE: usize = 1 + MAX_KEYS;

/// A set of currently held keys plus the modifier byte.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct KeyboardReport {
    /// Modifier key bitfield.
    pub modifier: u8,
    /// Held key usages; unused slots are zero.
    pub keycodes: [u8; MAX_KEYS],
}

impl KeyboardReport {
    /// All keys released.
    pub const fn release() -> Self {
        Self {
            modifier: 0,
            keycodes: [0; MAX_KEYS],
        }
    }

    /// Modifiers only, no keys held.
    pub const fn modifiers(modifier: u8) -> Self {
        Self {
            modifier,
            keycodes: [0; MAX_KEYS],
        }
    }

    /// Modifiers plus a single held key.
    pub const fn single(modifier: u8, usage: u8) -> Self {
        let mut keycodes = [0; MAX_KEYS];
        keycodes[0] = usage;
        Self { modifier, keycodes }
    }

    /// Build a report from a batch of held keys.
    ///
    /// Keys beyond [`MAX_KEYS`] are ignored; callers that batch keys are
    /// expected to split before reaching the cap.
    pub fn from_keys(modifier: u8, keys: &[u8]) -> Self {
        let mut keycodes = [0; MAX_KEYS];
        for (slot, &key) in keycodes.iter_mut().zip(keys) {
            *slot = key;
        }
        Self { modifier, keycodes }
    }

    /// Returns `true` if no modifiers and no keys are held.
    pub fn is_release(&self) -> bool {
        self.modifier == 0 && self.keycodes.iter().all(|&k| k == 0)
    }

    /// Wire bytes for the keyboard characteristic.
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let mut buf = [0u8; KEYBOARD_REPORT_SIZE];
        buf[0] = self.modifier;
        buf[1..].copy_from_slice(&self.keycodes);
        buf
    }
}
