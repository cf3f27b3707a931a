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

//! Bulk text to keyboard report batching.

use tracing::debug;

use crate::hid::keyboard::{KeyboardReport, MAX_KEYS};
use crate::input::keys::stroke_for_char;

/// Encode `text` as a sequence of keyboard reports.
///
/// Consecutive characters are pressed together while they share a modifier,
/// do not repeat a key already held, and fit in one report. Every batch is
/// followed by an all-released report. Characters with no key mapping are
/// skipped.
pub fn encode_text(text: &str) -> Vec<KeyboardReport> {
    let mut reports = Vec::new();
    let mut batch: Vec<u8> = Vec::with_capacity(MAX_KEYS);
    let mut batch_modifier = 0u8;

    for c in text.chars() {
        let Some(stroke) = stroke_for_char(c) else {
            debug!("Skipping unmappable character {:?}", c);
            continue;
        };

        let starts_new_batch = !batch.is_empty()
            && (stroke.modifier != batch_modifier
                || batch.contains(&stroke.usage)
                || batch.len() == MAX_KEYS);
        if starts_new_batch {
            flush(&mut reports, batch_modifier, &mut batch);
        }

        if batch.is_empty() {
            batch_modifier = stroke.modifier;
        }
        batch.push(stroke.usage);
    }

    if !batch.is_empty() {
        flush(&mut reports, batch_modifier, &mut batch);
    }
    reports
}

fn flush(reports: &mut Vec<KeyboardReport>, modifier: u8, batch: &mut Vec<u8>) {
    reports.push(KeyboardReport::from_keys(modifier, batch));
    reports.push(KeyboardReport::release());
    batch.clear();
}
