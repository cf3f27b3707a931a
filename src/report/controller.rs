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

//! Report pipeline: host input in, encoded reports queued, drained to the
//! link at a fixed cadence.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn, Instrument, Span};

use super::queue::ReportQueue;
use super::text::encode_text;
use super::ReportSink;
use crate::hid::keyboard::KeyboardReport;
use crate::hid::mouse::MouseReport;
use crate::hid::usage::{self, modifier};
use crate::hid::Report;
use crate::input::keys::{HeldModifiers, HostModifiers, Key};

/// What one drain step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue was empty.
    Idle,
    /// Head report handed to the sink.
    Sent,
    /// Head report discarded because the link was not ready.
    Dropped,
}

pub struct ReportController {
    queue: ReportQueue,
    sink: Arc<dyn ReportSink>,
    /// Physical modifier keys seen going down and not yet up.
    held: Mutex<HeldModifiers>,
    span: Span,
}

impl ReportController {
    /// `queue_capacity` of `0` leaves the queue unbounded.
    pub fn new(sink: Arc<dyn ReportSink>, queue_capacity: usize, span: Span) -> Self {
        Self {
            queue: ReportQueue::new(queue_capacity),
            sink,
            held: Mutex::new(HeldModifiers::default()),
            span,
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Reports lost to queue overflow so far.
    pub fn dropped_reports(&self) -> u64 {
        self.queue.dropped()
    }

    /// Key down/up or a bare modifier change from the capture layer.
    ///
    /// `keycode` is a Linux evdev code; `None` means only the modifier
    /// snapshot changed. Key-downs with no HID mapping are dropped.
    pub fn report_keyboard_event(
        &self,
        modifiers: HostModifiers,
        key_down: bool,
        keycode: Option<u16>,
    ) {
        let _enter = self.span.enter();
        let key = keycode.and_then(Key::from_evdev);
        if let (Some(code), None) = (keycode, key) {
            if key_down {
                warn!("No HID mapping for keycode {}, dropping", code);
                return;
            }
        }

        let hid = key.map(Key::to_hid);
        // A modifier key reports its physical side.
        let changed = hid.and_then(usage::modifier_bit);
        let mask = {
            let mut held = self.held.lock();
            if let Some(bit) = changed {
                held.update(bit, key_down);
            }
            held.resolve(modifiers, changed)
        };

        let report = match hid {
            Some(hid) if key_down && changed.is_none() => KeyboardReport::single(mask, hid),
            _ => KeyboardReport::modifiers(mask),
        };
        self.queue.push(report.into());
    }

    pub fn report_mouse_movement(&self, dx: f64, dy: f64, buttons: u8) {
        self.queue
            .push(MouseReport::movement(dx, dy, buttons).into());
    }

    pub fn report_mouse_button(&self, buttons: u8) {
        self.queue.push(MouseReport::buttons(buttons).into());
    }

    pub fn report_mouse_wheel(&self, scroll: f64, pan: f64, buttons: u8) {
        self.queue
            .push(MouseReport::wheel(scroll, pan, buttons).into());
    }

    /// Queue a prebuilt report, e.g. from the touch tracker.
    pub fn enqueue(&self, report: Report) {
        self.queue.push(report);
    }

    /// Type `text` as batched key presses. Returns the number of reports
    /// queued.
    pub fn send_text_string(&self, text: &str) -> usize {
        let _enter = self.span.enter();
        let reports = encode_text(text);
        let count = reports.len();
        debug!("Typing {} chars as {} reports", text.chars().count(), count);
        self.queue.extend(reports.into_iter().map(Report::from));
        count
    }

    /// Tap `usage` with `modifiers` held, then release everything.
    pub fn send_combo(&self, modifiers: u8, usage: u8) {
        self.queue.extend([
            KeyboardReport::single(modifiers, usage).into(),
            Report::release_all(),
        ]);
    }

    pub fn send_ctrl_alt_del(&self) {
        self.send_combo(modifier::LEFT_CTRL | modifier::LEFT_ALT, usage::DELETE);
    }

    pub fn send_ctrl_alt_t(&self) {
        self.send_combo(modifier::LEFT_CTRL | modifier::LEFT_ALT, usage::T);
    }

    pub fn send_meta_tab(&self) {
        self.send_combo(modifier::LEFT_META, usage::TAB);
    }

    pub fn release_all_keys(&self) {
        self.queue.push(Report::release_all());
    }

    /// Emergency stop: discard everything pending and send a release-all
    /// straight away. The queue is empty afterwards.
    pub fn clear_queue(&self) {
        let _enter = self.span.enter();
        let (discarded, delivered) = self
            .queue
            .clear_then(|| self.deliver(Report::release_all()));
        info!(
            "Cleared {} pending report(s), release-all {}",
            discarded,
            if delivered { "sent" } else { "not sent" }
        );
    }

    /// Take one report off the queue and send it if the link is ready.
    /// Reports drained while the link is down are discarded.
    pub fn drain_once(&self) -> DrainOutcome {
        self.queue
            .pop_with(|report| {
                if self.deliver(report) {
                    DrainOutcome::Sent
                } else {
                    DrainOutcome::Dropped
                }
            })
            .unwrap_or(DrainOutcome::Idle)
    }

    fn deliver(&self, report: Report) -> bool {
        if !self.sink.is_ready() {
            trace!(parent: &self.span, "Link not ready, discarding {:?}", report);
            return false;
        }
        self.sink.send_report(&report)
    }

    /// Start the clocked drain: one report per `period`.
    pub fn spawn_drain(self: &Arc<Self>, period: Duration) -> DrainHandle {
        let controller = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                debug!("Report drain started ({:?})", period);

                loop {
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = ticker.tick() => {
                            controller.drain_once();
                        }
                    }
                }
                debug!("Report drain stopped");
            }
            .instrument(self.span.clone()),
        );

        DrainHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owner of the drain task. Dropping it stops the drain.
pub struct DrainHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DrainHandle {
    /// Stop the drain and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Report drain task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for DrainHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::mouse::button;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that records every report it accepts.
    #[derive(Default)]
    struct RecordingSink {
        ready: AtomicBool,
        sent: Mutex<Vec<Report>>,
    }

    impl RecordingSink {
        fn ready() -> Arc<Self> {
            let sink = Self::default();
            sink.ready.store(true, Ordering::SeqCst);
            Arc::new(sink)
        }

        fn sent(&self) -> Vec<Report> {
            self.sent.lock().clone()
        }
    }

    impl ReportSink for RecordingSink {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn send_report(&self, report: &Report) -> bool {
            self.sent.lock().push(*report);
            true
        }
    }

    fn controller(sink: Arc<RecordingSink>) -> Arc<ReportController> {
        Arc::new(ReportController::new(sink, 0, Span::none()))
    }

    fn drain_all(controller: &ReportController) {
        while controller.drain_once() != DrainOutcome::Idle {}
    }

    fn keyboard(report: &Report) -> KeyboardReport {
        match report {
            Report::Keyboard(k) => *k,
            other => panic!("expected keyboard report, got {:?}", other),
        }
    }

    #[test]
    fn test_key_down_and_up() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        // evdev 30 is A.
        controller.report_keyboard_event(HostModifiers::SHIFT, true, Some(30));
        controller.report_keyboard_event(HostModifiers::SHIFT, false, Some(30));
        drain_all(&controller);

        let sent = sink.sent();
        assert_eq!(
            keyboard(&sent[0]),
            KeyboardReport::single(modifier::LEFT_SHIFT, usage::A)
        );
        assert_eq!(
            keyboard(&sent[1]),
            KeyboardReport::modifiers(modifier::LEFT_SHIFT)
        );
    }

    #[test]
    fn test_modifier_only_change() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        controller.report_keyboard_event(HostModifiers::CONTROL | HostModifiers::ALT, true, None);
        drain_all(&controller);

        assert_eq!(
            keyboard(&sink.sent()[0]).to_bytes(),
            [modifier::LEFT_CTRL | modifier::LEFT_ALT, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_right_modifier_reports_right_side() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        // evdev 54 is right shift; the snapshot already says SHIFT.
        controller.report_keyboard_event(HostModifiers::SHIFT, true, Some(54));
        controller.report_keyboard_event(HostModifiers::empty(), false, Some(54));
        drain_all(&controller);

        let sent = sink.sent();
        assert_eq!(keyboard(&sent[0]).modifier, modifier::RIGHT_SHIFT);
        assert_eq!(keyboard(&sent[1]), KeyboardReport::release());
    }

    #[test]
    fn test_both_sides_of_a_modifier_held() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        // Left shift (42), then right shift (54) while it is still down.
        controller.report_keyboard_event(HostModifiers::SHIFT, true, Some(42));
        controller.report_keyboard_event(HostModifiers::SHIFT, true, Some(54));
        controller.report_keyboard_event(HostModifiers::SHIFT, true, Some(30));
        controller.report_keyboard_event(HostModifiers::SHIFT, false, Some(54));
        drain_all(&controller);

        let sent = sink.sent();
        let both = modifier::LEFT_SHIFT | modifier::RIGHT_SHIFT;
        assert_eq!(keyboard(&sent[0]).modifier, modifier::LEFT_SHIFT);
        assert_eq!(keyboard(&sent[1]).modifier, both);
        assert_eq!(keyboard(&sent[2]), KeyboardReport::single(both, usage::A));
        assert_eq!(keyboard(&sent[3]).modifier, modifier::LEFT_SHIFT);
    }

    #[test]
    fn test_releasing_left_ctrl_keeps_right_ctrl() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        // Left ctrl (29) and right ctrl (97) down, then left ctrl up.
        controller.report_keyboard_event(HostModifiers::CONTROL, true, Some(29));
        controller.report_keyboard_event(HostModifiers::CONTROL, true, Some(97));
        controller.report_keyboard_event(HostModifiers::CONTROL, false, Some(29));
        controller.report_keyboard_event(HostModifiers::empty(), false, Some(97));
        drain_all(&controller);

        let sent = sink.sent();
        assert_eq!(
            keyboard(&sent[1]).modifier,
            modifier::LEFT_CTRL | modifier::RIGHT_CTRL
        );
        assert_eq!(
            keyboard(&sent[2]),
            KeyboardReport::modifiers(modifier::RIGHT_CTRL)
        );
        assert_eq!(keyboard(&sent[3]), KeyboardReport::release());
    }

    #[test]
    fn test_unmapped_key_down_dropped() {
        let sink = RecordingSink::ready();
        let controller = controller(sink);

        controller.report_keyboard_event(HostModifiers::empty(), true, Some(0x2FF));
        assert_eq!(controller.queue_depth(), 0);
    }

    #[test]
    fn test_mouse_reports() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        controller.report_mouse_movement(200.0, -200.0, button::LEFT);
        controller.report_mouse_button(button::RIGHT);
        controller.report_mouse_wheel(1.5, -0.5, 0);
        drain_all(&controller);

        let bytes: Vec<Vec<u8>> = sink.sent().iter().map(Report::to_bytes).collect();
        assert_eq!(
            bytes,
            vec![
                vec![1, 0x7F, 0x80],
                vec![2, 0, 0],
                vec![0, 0, 0, 15, 0xFB],
            ]
        );
    }

    #[test]
    fn test_combos_end_with_release() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        controller.send_ctrl_alt_del();
        controller.send_ctrl_alt_t();
        controller.send_meta_tab();
        drain_all(&controller);

        let sent = sink.sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(
            keyboard(&sent[0]).to_bytes(),
            [0x05, usage::DELETE, 0, 0, 0, 0, 0]
        );
        assert_eq!(keyboard(&sent[2]).to_bytes(), [0x05, usage::T, 0, 0, 0, 0, 0]);
        assert_eq!(keyboard(&sent[4]).to_bytes(), [0x08, usage::TAB, 0, 0, 0, 0, 0]);
        for release in sent.iter().skip(1).step_by(2) {
            assert!(release.is_release_all());
        }
    }

    #[test]
    fn test_text_drains_in_order() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        let queued = controller.send_text_string("hi!");
        assert_eq!(queued, controller.queue_depth());
        drain_all(&controller);

        let expected: Vec<Report> = encode_text("hi!").into_iter().map(Report::from).collect();
        assert_eq!(sink.sent(), expected);
    }

    #[test]
    fn test_drain_discards_when_not_ready() {
        let sink = Arc::new(RecordingSink::default());
        let controller = controller(sink.clone());

        controller.send_combo(0, usage::A);
        assert_eq!(controller.drain_once(), DrainOutcome::Dropped);
        assert_eq!(controller.queue_depth(), 1);

        sink.ready.store(true, Ordering::SeqCst);
        assert_eq!(controller.drain_once(), DrainOutcome::Sent);
        assert_eq!(controller.drain_once(), DrainOutcome::Idle);
        assert_eq!(sink.sent(), vec![Report::release_all()]);
    }

    #[test]
    fn test_clear_queue_sends_trailing_release() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        controller.send_text_string("hello world");
        assert!(controller.queue_depth() > 0);

        controller.clear_queue();

        assert_eq!(controller.queue_depth(), 0);
        assert_eq!(sink.sent(), vec![Report::release_all()]);
        assert_eq!(controller.drain_once(), DrainOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_one_report_per_tick() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());
        controller.send_text_string("abcabc");
        let depth = controller.queue_depth();

        let drain = controller.spawn_drain(Duration::from_millis(5));
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.sent().len(), 1);

        tokio::time::sleep(Duration::from_millis(5 * depth as u64)).await;
        assert_eq!(sink.sent().len(), depth);
        assert_eq!(controller.queue_depth(), 0);

        drain.stop().await;
        controller.release_all_keys();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.queue_depth(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_drain() {
        let sink = RecordingSink::ready();
        let controller = controller(sink.clone());

        let drain = controller.spawn_drain(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(1)).await;
        drop(drain);
        tokio::task::yield_now().await;

        controller.release_all_keys();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.queue_depth(), 1);
        assert!(sink.sent().is_empty());
    }
}
