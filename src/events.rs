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

//! Input events from the capture layer and their dispatch to the report
//! pipeline.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::hid::Report;
use crate::input::{HostModifiers, TouchTracker};
use crate::report::ReportController;

/// Fixed key combinations exposed as single actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combo {
    CtrlAltDel,
    CtrlAltT,
    MetaTab,
}

impl Combo {
    /// Parse a combo name such as `ctrl-alt-del`. Case and the choice of
    /// `-`, `+` or `_` as separator do not matter.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| match c {
                '+' | '_' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "ctrl-alt-del" | "ctrl-alt-delete" => Some(Combo::CtrlAltDel),
            "ctrl-alt-t" => Some(Combo::CtrlAltT),
            "meta-tab" | "super-tab" => Some(Combo::MetaTab),
            _ => None,
        }
    }
}

/// One event from the input capture layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Key press or release. `code` is a Linux evdev keycode.
    Key {
        code: u16,
        down: bool,
        modifiers: HostModifiers,
    },
    /// Modifier flags changed without a key event.
    ModifiersChanged(HostModifiers),
    MouseMoved {
        dx: f64,
        dy: f64,
        buttons: u8,
    },
    MouseButtons(u8),
    Scroll {
        scroll: f64,
        pan: f64,
        buttons: u8,
    },
    TouchBegan {
        x: f64,
        y: f64,
    },
    TouchMoved {
        x: f64,
        y: f64,
    },
    TouchEnded,
    /// Bulk text, e.g. a clipboard paste.
    Paste(String),
    Combo(Combo),
    ReleaseAll,
    /// Emergency stop for a runaway queue.
    ClearQueue,
}

/// Maps input events onto report controller operations.
pub struct EventProcessor {
    controller: Arc<ReportController>,
    touch: TouchTracker,
}

impl EventProcessor {
    pub fn new(controller: Arc<ReportController>) -> Self {
        Self {
            controller,
            touch: TouchTracker::new(),
        }
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::Key {
                code,
                down,
                modifiers,
            } => self
                .controller
                .report_keyboard_event(modifiers, down, Some(code)),
            InputEvent::ModifiersChanged(modifiers) => {
                // Whether the change is a press or release only matters for
                // modifier keys, which arrive as `Key` events.
                self.controller.report_keyboard_event(modifiers, true, None)
            }
            InputEvent::MouseMoved { dx, dy, buttons } => {
                self.controller.report_mouse_movement(dx, dy, buttons)
            }
            InputEvent::MouseButtons(buttons) => self.controller.report_mouse_button(buttons),
            InputEvent::Scroll {
                scroll,
                pan,
                buttons,
            } => self.controller.report_mouse_wheel(scroll, pan, buttons),
            InputEvent::TouchBegan { x, y } => {
                let report = self.touch.begin(x, y);
                self.controller.enqueue(Report::from(report));
            }
            InputEvent::TouchMoved { x, y } => match self.touch.moved(x, y) {
                Some(report) => self.controller.enqueue(Report::from(report)),
                None => debug!("Touch move without touch in progress"),
            },
            InputEvent::TouchEnded => {
                if !self.touch.is_touching() {
                    warn!("Touch end without touch in progress");
                }
                let report = self.touch.end();
                self.controller.enqueue(Report::from(report));
            }
            InputEvent::Paste(text) => {
                debug!("Processing paste: {} chars", text.chars().count());
                self.controller.send_text_string(&text);
            }
            InputEvent::Combo(combo) => {
                debug!("Sending combo {:?}", combo);
                match combo {
                    Combo::CtrlAltDel => self.controller.send_ctrl_alt_del(),
                    Combo::CtrlAltT => self.controller.send_ctrl_alt_t(),
                    Combo::MetaTab => self.controller.send_meta_tab(),
                }
            }
            InputEvent::ReleaseAll => self.controller.release_all_keys(),
            InputEvent::ClearQueue => self.controller.clear_queue(),
        }
    }
}
