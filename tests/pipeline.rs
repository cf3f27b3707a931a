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

//! End-to-end: input events through the queue and drain, across the link
//! service, onto a scripted transport.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

use remote_input::bluetooth::ble_constants::{
    KEYBOARD_CHAR_UUID, MOUSE_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID,
};
use remote_input::bluetooth::{
    event_channel, CharacteristicHandle, ConnectionState, DeviceId, DiscoveredCharacteristic,
    EventSender, LinkCommand, LinkEvent, LinkOptions, LinkService, Transport,
};
use remote_input::events::{EventProcessor, InputEvent};
use remote_input::report::{encode_text, ReportController};

const KEYBOARD: CharacteristicHandle = CharacteristicHandle(0x2a);
const MOUSE: CharacteristicHandle = CharacteristicHandle(0x2d);
const STATUS: CharacteristicHandle = CharacteristicHandle(0x30);

/// Transport that answers every command like a well-behaved dongle.
struct ScriptedDongle {
    events: EventSender,
    /// Fail the status read, as an unbonded dongle does.
    reject_pairing: bool,
    commands: Mutex<Vec<LinkCommand>>,
    writes: Mutex<Vec<(CharacteristicHandle, Vec<u8>)>>,
}

impl ScriptedDongle {
    fn new(events: EventSender, reject_pairing: bool) -> Arc<Self> {
        Arc::new(Self {
            events,
            reject_pairing,
            commands: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn reply(&self, event: LinkEvent) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(event).await;
        });
    }

    fn keyboard_writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .filter(|(handle, _)| *handle == KEYBOARD)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Transport for ScriptedDongle {
    fn execute(&self, command: LinkCommand) {
        self.commands.lock().push(command.clone());
        match command {
            LinkCommand::Connect { device, attempt } => {
                self.reply(LinkEvent::LinkEstablished { device, attempt })
            }
            LinkCommand::DiscoverServices { device, attempt } => {
                self.reply(LinkEvent::ServicesDiscovered {
                    device,
                    attempt,
                    result: Ok(vec![SERVICE_UUID]),
                })
            }
            LinkCommand::DiscoverCharacteristics { device, attempt } => {
                self.reply(LinkEvent::CharacteristicsDiscovered {
                    device,
                    attempt,
                    result: Ok(vec![
                        DiscoveredCharacteristic {
                            uuid: KEYBOARD_CHAR_UUID,
                            handle: KEYBOARD,
                        },
                        DiscoveredCharacteristic {
                            uuid: MOUSE_CHAR_UUID,
                            handle: MOUSE,
                        },
                        DiscoveredCharacteristic {
                            uuid: STATUS_CHAR_UUID,
                            handle: STATUS,
                        },
                    ]),
                })
            }
            LinkCommand::ProbeStatus {
                device, attempt, ..
            } => {
                let result = if self.reject_pairing {
                    Err("Authentication failed".to_string())
                } else {
                    Ok(())
                };
                self.reply(LinkEvent::StatusProbed {
                    device,
                    attempt,
                    result,
                })
            }
            LinkCommand::Disconnect { device, attempt } => self.reply(LinkEvent::LinkLost {
                device,
                attempt,
                reason: None,
            }),
            LinkCommand::StartScan | LinkCommand::StopScan => {}
        }
    }

    fn write_without_response(
        &self,
        _device: &DeviceId,
        handle: CharacteristicHandle,
        payload: Vec<u8>,
    ) {
        self.writes.lock().push((handle, payload));
    }
}

struct Harness {
    dongle: Arc<ScriptedDongle>,
    link: Arc<LinkService>,
    controller: Arc<ReportController>,
}

fn harness(reject_pairing: bool) -> Harness {
    let (event_tx, event_rx) = event_channel();
    let dongle = ScriptedDongle::new(event_tx.clone(), reject_pairing);
    let link = Arc::new(LinkService::new(
        dongle.clone(),
        LinkOptions::default(),
        Span::none(),
    ));
    tokio::spawn(link.clone().run(event_rx));
    let controller = Arc::new(ReportController::new(link.clone(), 0, Span::none()));

    // The adapter comes up powered.
    tokio::spawn(async move {
        let _ = event_tx.send(LinkEvent::AdapterPowered(true)).await;
    });

    Harness {
        dongle,
        link,
        controller,
    }
}

async fn advertise(h: &Harness) {
    h.link
        .subscribe()
        .wait_for(|s| s.powered)
        .await
        .expect("link service running");
    h.link.start_scanning();
    h.dongle.reply(LinkEvent::Advertisement {
        device: DeviceId::new("C0:FF:EE:00:00:01"),
        name: Some("HID Dongle".to_string()),
    });
}

#[tokio::test(start_paused = true)]
async fn test_pasted_text_reaches_keyboard_characteristic() {
    let h = harness(false);
    advertise(&h).await;
    h.link
        .subscribe()
        .wait_for(|s| s.state == ConnectionState::Ready)
        .await
        .expect("link ready");

    let drain = h.controller.spawn_drain(Duration::from_millis(5));
    let mut processor = EventProcessor::new(h.controller.clone());
    processor.process_event(InputEvent::Paste("Hello".to_string()));
    processor.process_event(InputEvent::MouseMoved {
        dx: 4.0,
        dy: -4.0,
        buttons: 0,
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    drain.stop().await;

    let expected: Vec<Vec<u8>> = encode_text("Hello")
        .iter()
        .map(|report| report.to_bytes().to_vec())
        .collect();
    assert_eq!(h.dongle.keyboard_writes(), expected);

    let writes = h.dongle.writes.lock().clone();
    assert_eq!(writes.last(), Some(&(MOUSE, vec![0, 4, 0xFC])));
    assert_eq!(h.controller.queue_depth(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reports_before_ready_are_discarded() {
    let h = harness(false);
    let drain = h.controller.spawn_drain(Duration::from_millis(5));

    h.controller.send_ctrl_alt_del();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.queue_depth(), 0);

    advertise(&h).await;
    h.link
        .subscribe()
        .wait_for(|s| s.state == ConnectionState::Ready)
        .await
        .expect("link ready");
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain.stop().await;

    assert!(h.dongle.writes.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_pairing_drops_link() {
    let h = harness(true);
    advertise(&h).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let dongle_id = DeviceId::new("C0:FF:EE:00:00:01");
    let commands = h.dongle.commands.lock().clone();
    assert!(commands
        .iter()
        .any(|c| matches!(c, LinkCommand::ProbeStatus { device, .. } if *device == dongle_id)));
    assert!(matches!(
        commands.last(),
        Some(LinkCommand::Disconnect { device, .. }) if *device == dongle_id
    ));

    let snapshot = h.link.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.active.is_none());
    assert!(!snapshot.scanning);

    h.controller.send_text_string("lost");
    assert_eq!(
        h.controller.drain_once(),
        remote_input::report::DrainOutcome::Dropped
    );
    assert!(h.dongle.writes.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_sends_release_to_ready_link() {
    let h = harness(false);
    advertise(&h).await;
    h.link
        .subscribe()
        .wait_for(|s| s.state == ConnectionState::Ready)
        .await
        .expect("link ready");

    h.controller.send_text_string("a long paste that will be abandoned");
    h.controller.clear_queue();

    assert_eq!(h.controller.queue_depth(), 0);
    assert_eq!(h.dongle.keyboard_writes(), vec![vec![0u8; 7]]);
}
