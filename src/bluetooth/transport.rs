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

//! Seam between the link state machine and a platform BLE central stack.

use tokio::sync::mpsc;

use super::discovery::DeviceId;
use super::state_machine::{CharacteristicHandle, LinkCommand, LinkEvent};

/// Capacity of the radio event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub type EventSender = mpsc::Sender<LinkEvent>;
pub type EventReceiver = mpsc::Receiver<LinkEvent>;

/// Channel carrying radio callbacks from a transport to the link service.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// A BLE central stack.
///
/// Both methods are called with the link lock held and must not block:
/// implementations queue the work and report the outcome later as a
/// [`LinkEvent`] on the channel handed to them at construction.
pub trait Transport: Send + Sync {
    /// Carry out a radio operation requested by the state machine.
    fn execute(&self, command: LinkCommand);

    /// Queue a write-without-response of `payload` to `handle` on `device`.
    ///
    /// Writes must reach the radio in the order they were queued.
    fn write_without_response(
        &self,
        device: &DeviceId,
        handle: CharacteristicHandle,
        payload: Vec<u8>,
    );
}
