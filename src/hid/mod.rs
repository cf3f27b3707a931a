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

//! HID report codec.
//!
//! Pure encoders from host input primitives to the fixed byte layouts the
//! dongle expects on its keyboard and mouse characteristics.

pub mod keyboard;
pub mod mouse;
pub mod usage;

pub use keyboard::KeyboardReport;
pub use mouse::MouseReport;

/// Which characteristic a report is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportChannel {
    Keyboard,
    Mouse,
}

/// An encoded input report, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Keyboard(KeyboardReport),
    Mouse(MouseReport),
}

impl Report {
    /// The all-keys-released keyboard report.
    pub const fn release_all() -> Self {
        Report::Keyboard(KeyboardReport::release())
    }

    pub fn channel(&self) -> ReportChannel {
        match self {
            Report::Keyboard(_) => ReportChannel::Keyboard,
            Report::Mouse(_) => ReportChannel::Mouse,
        }
    }

    /// Payload for a write-without-response on [`Report::channel`].
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Report::Keyboard(k) => k.to_bytes().to_vec(),
            Report::Mouse(m) => m.to_bytes(),
        }
    }

    pub fn is_release_all(&self) -> bool {
        matches!(self, Report::Keyboard(k) if k.is_release())
    }
}

impl From<KeyboardReport> for Report {
    fn from(report: KeyboardReport) -> Self {
        Report::Keyboard(report)
    }
}

impl From<MouseReport> for Report {
    fn from(report: MouseReport) -> Self {
        Report::Mouse(report)
    }
}
