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

//! Touch surface to relative pointer conversion.

use crate::hid::mouse::{button, MouseReport};

/// Turns a single-finger touch track into mouse reports.
///
/// A touch holds the left button for its whole duration, so dragging on the
/// surface drags on the remote.
#[derive(Debug, Default)]
pub struct TouchTracker {
    last: Option<(f64, f64)>,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_touching(&self) -> bool {
        self.last.is_some()
    }

    /// Finger down: press the left button in place.
    pub fn begin(&mut self, x: f64, y: f64) -> MouseReport {
        self.last = Some((x, y));
        MouseReport::buttons(button::LEFT)
    }

    /// Finger moved. Returns `None` if no touch is in progress.
    pub fn moved(&mut self, x: f64, y: f64) -> Option<MouseReport> {
        let (last_x, last_y) = self.last?;
        self.last = Some((x, y));
        Some(MouseReport::movement(x - last_x, y - last_y, button::LEFT))
    }

    /// Finger lifted or the touch was cancelled: release all buttons.
    pub fn end(&mut self) -> MouseReport {
        self.last = None;
        MouseReport::buttons(0)
    }
}
