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

//! Link service: owns the state machine, drives the transport and
//! publishes state for observers.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn, Span};

use super::ble_constants::config;
use super::discovery::DeviceId;
use super::state_machine::{
    ConnectionState, LinkCommand, LinkEvent, LinkSnapshot, LinkStateMachine, Timeouts,
};
use super::transport::{EventReceiver, Transport};
use crate::hid::Report;
use crate::report::ReportSink;

/// Behaviour knobs for [`LinkService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Connect to the first discovered dongle without being asked.
    pub auto_connect: bool,
    /// Period of the liveness/timeout tick.
    pub liveness_tick: Duration,
    pub timeouts: Timeouts,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            liveness_tick: config::LIVENESS_TICK,
            timeouts: Timeouts::default(),
        }
    }
}

pub struct LinkService {
    machine: Mutex<LinkStateMachine>,
    transport: Arc<dyn Transport>,
    snapshot_tx: watch::Sender<LinkSnapshot>,
    options: LinkOptions,
    span: Span,
}

impl LinkService {
    pub fn new(transport: Arc<dyn Transport>, options: LinkOptions, span: Span) -> Self {
        let machine = LinkStateMachine::new(options.timeouts);
        let (snapshot_tx, _) = watch::channel(machine.snapshot());
        Self {
            machine: Mutex::new(machine),
            transport,
            snapshot_tx,
            options,
            span,
        }
    }

    pub fn start_scanning(&self) {
        self.apply(|machine| machine.start_scanning());
    }

    pub fn stop_scanning(&self) {
        self.apply(|machine| machine.stop_scanning());
    }

    /// Connect to a discovered dongle. Ignored unless the link is idle.
    pub fn connect(&self, device: DeviceId) {
        let now = Self::now();
        self.apply(|machine| {
            if machine.state() != ConnectionState::Disconnected {
                warn!(
                    "Ignoring connect to {} while {:?}",
                    device,
                    machine.state()
                );
                return Vec::new();
            }
            machine.connect(device, now)
        });
    }

    pub fn disconnect(&self) {
        self.apply(|machine| machine.disconnect());
    }

    /// Feed one radio callback into the machine.
    pub fn dispatch(&self, event: LinkEvent) {
        let now = Self::now();
        let auto_connect = self.options.auto_connect;
        self.apply(|machine| {
            let advertisement = matches!(event, LinkEvent::Advertisement { .. });
            let mut commands = machine.handle_event(event, now);

            if auto_connect
                && advertisement
                && machine.is_scanning()
                && machine.state() == ConnectionState::Disconnected
            {
                if let Some(device) = machine.discovered().first() {
                    info!("Auto-connecting to {}", device.display_name());
                    let id = device.id.clone();
                    commands.extend(machine.connect(id, now));
                }
            }
            commands
        });
    }

    pub fn tick(&self) {
        let now = Self::now();
        self.apply(|machine| machine.tick(now));
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.lock().state()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Observe state changes. Every receiver sees the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Event loop: radio callbacks plus the liveness tick. Runs until the
    /// transport drops its event sender.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        let mut ticker = tokio::time::interval(self.options.liveness_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        debug!(parent: &self.span, "Radio event channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.tick(),
            }
        }
    }

    /// Run one machine operation, hand its commands to the transport and
    /// publish the resulting snapshot, all under the machine lock.
    fn apply<F>(&self, operation: F)
    where
        F: FnOnce(&mut LinkStateMachine) -> Vec<LinkCommand>,
    {
        let _enter = self.span.enter();
        let mut machine = self.machine.lock();

        for command in operation(&mut machine) {
            trace!("Transport command: {:?}", command);
            self.transport.execute(command);
        }

        let snapshot = machine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            if current.state != snapshot.state {
                info!("Link state: {:?} -> {:?}", current.state, snapshot.state);
            }
            *current = snapshot;
            true
        });
    }

    fn now() -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl ReportSink for LinkService {
    fn is_ready(&self) -> bool {
        self.machine.lock().is_ready()
    }

    fn send_report(&self, report: &Report) -> bool {
        // Held across the write so nothing is queued after the link drops.
        let machine = self.machine.lock();
        let Some((device, handle)) = machine.write_target(report.channel()) else {
            return false;
        };

        let payload = report.to_bytes();
        trace!(
            parent: &self.span,
            "{:?} report -> {} [{:#06x}]: {}",
            report.channel(),
            device,
            handle.0,
            hex::encode(&payload)
        );
        self.transport
            .write_without_response(&device, handle, payload);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::ble_constants::{
        KEYBOARD_CHAR_UUID, MOUSE_CHAR_UUID, SERVICE_UUID, STATUS_CHAR_UUID,
    };
    use crate::bluetooth::state_machine::{CharacteristicHandle, DiscoveredCharacteristic};
    use crate::bluetooth::transport::event_channel;
    use crate::hid::{KeyboardReport, MouseReport};

    #[derive(Default)]
    struct RecordingTransport {
        commands: Mutex<Vec<LinkCommand>>,
        writes: Mutex<Vec<(DeviceId, CharacteristicHandle, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn take_commands(&self) -> Vec<LinkCommand> {
            std::mem::take(&mut *self.commands.lock())
        }
    }

    impl Transport for RecordingTransport {
        fn execute(&self, command: LinkCommand) {
            self.commands.lock().push(command);
        }

        fn write_without_response(
            &self,
            device: &DeviceId,
            handle: CharacteristicHandle,
            payload: Vec<u8>,
        ) {
            self.writes.lock().push((device.clone(), handle, payload));
        }
    }

    const FIRST: u64 = 1;

    fn dongle() -> DeviceId {
        DeviceId::new("AA:BB:CC:DD:EE:FF")
    }

    fn disconnect_command(attempt: u64) -> LinkCommand {
        LinkCommand::Disconnect {
            device: dongle(),
            attempt,
        }
    }

    fn service(auto_connect: bool) -> (Arc<LinkService>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let options = LinkOptions {
            auto_connect,
            ..LinkOptions::default()
        };
        let service = Arc::new(LinkService::new(transport.clone(), options, Span::none()));
        (service, transport)
    }

    fn drive_to_ready(service: &LinkService) {
        service.dispatch(LinkEvent::AdapterPowered(true));
        service.connect(dongle());
        service.dispatch(LinkEvent::LinkEstablished {
            device: dongle(),
            attempt: FIRST,
        });
        service.dispatch(LinkEvent::ServicesDiscovered {
            device: dongle(),
            attempt: FIRST,
            result: Ok(vec![SERVICE_UUID]),
        });
        service.dispatch(LinkEvent::CharacteristicsDiscovered {
            device: dongle(),
            attempt: FIRST,
            result: Ok(vec![
                DiscoveredCharacteristic {
                    uuid: KEYBOARD_CHAR_UUID,
                    handle: CharacteristicHandle(1),
                },
                DiscoveredCharacteristic {
                    uuid: MOUSE_CHAR_UUID,
                    handle: CharacteristicHandle(2),
                },
                DiscoveredCharacteristic {
                    uuid: STATUS_CHAR_UUID,
                    handle: CharacteristicHandle(3),
                },
            ]),
        });
        service.dispatch(LinkEvent::StatusProbed {
            device: dongle(),
            attempt: FIRST,
            result: Ok(()),
        });
    }

    #[test]
    fn test_scan_requires_power() {
        let (service, transport) = service(false);

        service.start_scanning();
        assert!(transport.take_commands().is_empty());

        service.dispatch(LinkEvent::AdapterPowered(true));
        service.start_scanning();
        assert_eq!(transport.take_commands(), vec![LinkCommand::StartScan]);
        assert!(service.snapshot().scanning);
    }

    #[test]
    fn test_auto_connect_to_first_advertiser() {
        let (service, transport) = service(true);
        service.dispatch(LinkEvent::AdapterPowered(true));
        service.start_scanning();
        transport.take_commands();

        service.dispatch(LinkEvent::Advertisement {
            device: dongle(),
            name: Some("Dongle".to_string()),
        });
        service.dispatch(LinkEvent::Advertisement {
            device: DeviceId::new("other"),
            name: None,
        });

        assert_eq!(
            transport.take_commands(),
            vec![
                LinkCommand::Connect {
                    device: dongle(),
                    attempt: FIRST
                },
                LinkCommand::StopScan
            ]
        );
        assert_eq!(service.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_no_auto_connect_when_disabled() {
        let (service, transport) = service(false);
        service.dispatch(LinkEvent::AdapterPowered(true));
        service.start_scanning();
        transport.take_commands();

        service.dispatch(LinkEvent::Advertisement {
            device: dongle(),
            name: None,
        });

        assert!(transport.take_commands().is_empty());
        assert_eq!(service.snapshot().discovered.len(), 1);
    }

    #[test]
    fn test_connect_ignored_while_busy() {
        let (service, transport) = service(false);
        service.dispatch(LinkEvent::AdapterPowered(true));
        service.connect(dongle());
        transport.take_commands();

        service.connect(DeviceId::new("other"));
        assert!(transport.take_commands().is_empty());
    }

    #[test]
    fn test_reports_written_only_when_ready() {
        let (service, transport) = service(false);
        let report = Report::from(KeyboardReport::single(0, 0x04));

        assert!(!service.is_ready());
        assert!(!service.send_report(&report));

        drive_to_ready(&service);
        assert!(service.is_ready());
        assert!(service.send_report(&report));
        assert!(service.send_report(&Report::from(MouseReport::movement(1.0, -1.0, 0))));

        let writes = transport.writes.lock().clone();
        assert_eq!(
            writes,
            vec![
                (dongle(), CharacteristicHandle(1), vec![0, 0x04, 0, 0, 0, 0, 0]),
                (dongle(), CharacteristicHandle(2), vec![0, 1, 0xFF]),
            ]
        );
    }

    #[test]
    fn test_user_disconnect_waits_for_link_loss() {
        let (service, transport) = service(false);
        drive_to_ready(&service);
        transport.take_commands();

        service.disconnect();
        assert_eq!(transport.take_commands(), vec![disconnect_command(FIRST)]);
        assert_eq!(service.state(), ConnectionState::Ready);

        service.dispatch(LinkEvent::LinkLost {
            device: dongle(),
            attempt: FIRST,
            reason: Some("disconnect requested".to_string()),
        });
        assert_eq!(service.state(), ConnectionState::Disconnected);
        assert!(!service.send_report(&Report::release_all()));
    }

    #[test]
    fn test_snapshot_published_on_change() {
        let (service, _transport) = service(false);
        let mut updates = service.subscribe();
        assert!(!updates.borrow_and_update().powered);

        service.dispatch(LinkEvent::AdapterPowered(true));
        assert!(updates.has_changed().unwrap_or(false));
        assert!(updates.borrow_and_update().powered);

        // Same state again: nothing new to observe.
        service.dispatch(LinkEvent::AdapterPowered(true));
        assert!(!updates.has_changed().unwrap_or(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_prunes_silent_devices() {
        let (service, _transport) = service(false);
        let (event_tx, event_rx) = event_channel();
        let task = tokio::spawn(service.clone().run(event_rx));
        let mut updates = service.subscribe();

        event_tx
            .send(LinkEvent::AdapterPowered(true))
            .await
            .expect("loop running");
        updates.wait_for(|s| s.powered).await.expect("powered");

        service.start_scanning();
        event_tx
            .send(LinkEvent::Advertisement {
                device: dongle(),
                name: None,
            })
            .await
            .expect("loop running");
        updates
            .wait_for(|s| s.discovered.len() == 1)
            .await
            .expect("discovered");

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(service.snapshot().discovered.is_empty());
        assert!(service.snapshot().scanning);

        drop(event_tx);
        task.await.expect("loop exits when the channel closes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_times_out_stuck_connect() {
        let (service, transport) = service(false);
        let (event_tx, event_rx) = event_channel();
        let task = tokio::spawn(service.clone().run(event_rx));

        event_tx
            .send(LinkEvent::AdapterPowered(true))
            .await
            .expect("loop running");
        service
            .subscribe()
            .wait_for(|s| s.powered)
            .await
            .expect("powered");
        service.connect(dongle());
        transport.take_commands();

        tokio::time::sleep(config::CONNECT_TIMEOUT + Duration::from_secs(2)).await;

        assert_eq!(service.state(), ConnectionState::Disconnected);
        assert_eq!(transport.take_commands(), vec![disconnect_command(FIRST)]);
        task.abort();
    }

    #[test]
    fn test_scan_stopped_allows_rescan() {
        let (service, transport) = service(true);
        service.dispatch(LinkEvent::AdapterPowered(true));
        service.start_scanning();
        transport.take_commands();
        let mut updates = service.subscribe();
        assert!(updates.borrow_and_update().scanning);

        service.dispatch(LinkEvent::ScanStopped {
            reason: Some("org.freedesktop.DBus.Error.NoReply".to_string()),
        });
        assert!(updates.has_changed().unwrap_or(false));
        let snapshot = updates.borrow_and_update().clone();
        assert!(!snapshot.scanning);
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(transport.take_commands().is_empty());

        // What the idle watcher does next.
        service.start_scanning();
        assert_eq!(transport.take_commands(), vec![LinkCommand::StartScan]);
        assert!(service.snapshot().scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_loss_from_timed_out_connect_spares_reconnect() {
        let (service, transport) = service(true);
        let (event_tx, event_rx) = event_channel();
        let task = tokio::spawn(service.clone().run(event_rx));

        event_tx
            .send(LinkEvent::AdapterPowered(true))
            .await
            .expect("loop running");
        let mut updates = service.subscribe();
        updates.wait_for(|s| s.powered).await.expect("powered");
        service.connect(dongle());
        transport.take_commands();

        tokio::time::sleep(config::CONNECT_TIMEOUT + Duration::from_secs(2)).await;
        assert_eq!(transport.take_commands(), vec![disconnect_command(FIRST)]);

        // Rescan and auto-connect pick the same dongle up again.
        service.start_scanning();
        service.dispatch(LinkEvent::Advertisement {
            device: dongle(),
            name: None,
        });
        assert_eq!(service.state(), ConnectionState::Connecting);
        assert!(transport.take_commands().contains(&LinkCommand::Connect {
            device: dongle(),
            attempt: FIRST + 1,
        }));

        // The transport's answer to the abandoned attempt's disconnect.
        event_tx
            .send(LinkEvent::LinkLost {
                device: dongle(),
                attempt: FIRST,
                reason: Some("disconnect requested".to_string()),
            })
            .await
            .expect("loop running");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(service.state(), ConnectionState::Connecting);
        assert!(transport.take_commands().is_empty());
        task.abort();
    }
}
