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

//! Report queueing and delivery.

pub mod controller;
pub mod queue;
pub mod text;

pub use controller::{DrainHandle, DrainOutcome, ReportController};
pub use queue::ReportQueue;
pub use text::encode_text;

use crate::hid::Report;

/// Where drained reports go: the link to the dongle.
pub trait ReportSink: Send + Sync {
    /// Whether a report sent now would reach the dongle.
    fn is_ready(&self) -> bool;

    /// Write `report` to its characteristic. Returns `false` if it was not
    /// sent.
    fn send_report(&self, report: &Report) -> bool;
}
