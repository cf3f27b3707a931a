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

//! FIFO of encoded reports waiting for the drain.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::hid::Report;

/// Thread-safe report FIFO with an optional capacity.
///
/// Reports leave in exactly the order they were pushed. When full, the
/// oldest pending report is discarded to make room.
#[derive(Debug)]
pub struct ReportQueue {
    reports: Mutex<VecDeque<Report>>,
    capacity: Option<usize>,
    dropped: AtomicU64,
}

impl ReportQueue {
    /// A queue holding at most `capacity` reports; `0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            capacity: (capacity > 0).then_some(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, report: Report) {
        self.extend([report]);
    }

    /// Append several reports as one contiguous run.
    pub fn extend<I>(&self, reports: I)
    where
        I: IntoIterator<Item = Report>,
    {
        let mut queue = self.reports.lock();
        for report in reports {
            queue.push_back(report);
            if let Some(capacity) = self.capacity {
                if queue.len() > capacity {
                    queue.pop_front();
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "Report queue full ({} pending), dropped oldest report ({} total)",
                        capacity, total
                    );
                }
            }
        }
    }

    pub fn pop(&self) -> Option<Report> {
        self.reports.lock().pop_front()
    }

    /// Pop the head and hand it to `f` while the queue is still locked, so
    /// nothing can be pushed or cleared in between.
    pub fn pop_with<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(Report) -> R,
    {
        let mut queue = self.reports.lock();
        queue.pop_front().map(f)
    }

    /// Discard everything pending, then run `f` before releasing the lock.
    ///
    /// Returns the number of discarded reports alongside `f`'s result.
    pub fn clear_then<F, R>(&self, f: F) -> (usize, R)
    where
        F: FnOnce() -> R,
    {
        let mut queue = self.reports.lock();
        let discarded = queue.len();
        queue.clear();
        (discarded, f())
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Reports discarded by the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
