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

//! BLE central side: discovery, connection lifecycle and report writes.

pub mod ble_constants;
pub mod bluez;
pub mod discovery;
pub mod link;
pub mod state_machine;
pub mod transport;

pub use bluez::BluezTransport;
pub use discovery::{DeviceDescriptor, DeviceId, DeviceRegistry};
pub use link::{LinkOptions, LinkService};
pub use state_machine::{
    CharacteristicHandle, CharacteristicHandles, ConnectionState, DiscoveredCharacteristic,
    LinkCommand, LinkEvent, LinkSnapshot, LinkStateMachine, Timeouts,
};
pub use transport::{event_channel, EventReceiver, EventSender, Transport};
