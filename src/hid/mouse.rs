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

//! Mouse reports written to the dongle's mouse characteristic.
//!
//! The dongle tells the two variants apart by payload length only:
//! ```text
//! Movement (3 bytes): buttons, dx, dy
//! Wheel    (5 bytes): buttons, 0, 0, scroll, pan
//! ```
//! All deltas are signed 8-bit values, saturated (never wrapped).

/// Movement report size in bytes.
pub const MOUSE_MOVE_REPORT_SIZE: usize = 3;

/// Wheel report size in bytes.
pub const MOUSE_WHEEL_REPORT_SIZE: usize = 5;

/// Host wheel deltas are usually fractional; scale them so single notches
/// survive the conversion to whole steps.
pub const WHEEL_SCALE: f64 = 10.0;

/// Button bits (bit 0 = left, bit 1 = right, bit 2 = middle).
pub mod button {
    pub const LEFT: u8 = 1 << 0;
    pub const RIGHT: u8 = 1 << 1;
    pub const MIDDLE: u8 = 1 << 2;
}

/// Saturate a host delta into the signed 8-bit range.
///
/// Truncates toward zero after clamping; NaN maps to 0.
pub fn clamp_delta(value: f64) -> i8 {
    value.clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseReport {
    /// Relative pointer movement with the current button state.
    Move { buttons: u8, dx: i8, dy: i8 },
    /// Vertical scroll and horizontal pan with the current button state.
    Wheel { buttons: u8, scroll: i8, pan: i8 },
}

impl MouseReport {
    /// Movement report from raw host deltas.
    pub fn movement(dx: f64, dy: f64, buttons: u8) -> Self {
        MouseReport::Move {
            buttons,
            dx: clamp_delta(dx),
            dy: clamp_delta(dy),
        }
    }

    /// Button state change without movement.
    pub fn buttons(buttons: u8) -> Self {
        MouseReport::Move {
            buttons,
            dx: 0,
            dy: 0,
        }
    }

    /// Wheel report from raw host scroll (vertical) and pan (horizontal)
    /// deltas. Both are scaled by [`WHEEL_SCALE`] before clamping.
    pub fn wheel(scroll: f64, pan: f64, buttons: u8) -> Self {
        MouseReport::Wheel {
            buttons,
            scroll: clamp_delta(scroll * WHEEL_SCALE),
            pan: clamp_delta(pan * WHEEL_SCALE),
        }
    }

    /// Wire bytes for the mouse characteristic.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MouseReport::Move { buttons, dx, dy } => vec![buttons, dx as u8, dy as u8],
            MouseReport::Wheel {
                buttons,
                scroll,
                pan,
            } => vec![buttons, 0, 0, scroll as u8, pan as u8],
        }
    }
}
