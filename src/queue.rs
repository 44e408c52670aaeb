// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::entry::InterestEntry;

/// Which of the two transfer-phase lists an entry currently sits on, if
/// either. Mutated only while `fast_lock` is held, which is why
/// a plain flag on the entry is sufficient here instead of raw intrusive
/// links (see DESIGN.md, Open Question 1): every reader and writer of
/// this flag already holds the one lock that serializes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueuedOn {
    /// Not linked into either list.
    None,
    /// Linked into the engine's main ready queue.
    Ready,
    /// Linked into the overflow chain.
    Overflow,
}

/// The overflow sink: inactive outside a transfer phase, or collecting
/// wakeups that race with an in-progress harvest.
#[derive(Debug)]
pub(crate) enum Overflow {
    Inactive,
    Active(Vec<Arc<InterestEntry>>),
}

/// State mutated only under `fast_lock`: the ready queue and the overflow
/// sink.
#[derive(Debug, Default)]
pub(crate) struct FastState {
    pub(crate) ready: VecDeque<Arc<InterestEntry>>,
    pub(crate) overflow: Overflow,
}

impl Default for Overflow {
    fn default() -> Self {
        Overflow::Inactive
    }
}

impl FastState {
    /// Appends `entry` to whichever sink is currently active — `ready` if
    /// the engine is outside its transfer phase, `overflow` if a `wait`
    /// call is mid-harvest — unless it is already linked into *either* list
    ///. Checking both, not just the target sink, is what
    /// keeps an entry from ending up linked twice when a harvest's own
    /// re-arm races a concurrent wakeup for the same entry.
    pub(crate) fn enqueue_for_wakeup(&mut self, entry: &Arc<InterestEntry>) {
        if entry.queued_on() != QueuedOn::None {
            return;
        }
        match &mut self.overflow {
            Overflow::Active(chain) => {
                chain.push(entry.clone());
                entry.set_queued_on(QueuedOn::Overflow);
            }
            Overflow::Inactive => {
                self.ready.push_back(entry.clone());
                entry.set_queued_on(QueuedOn::Ready);
            }
        }
    }

    /// Unconditionally directs `entry` onto the main ready list, skipping
    /// the overflow sink, unless it is already linked somewhere. Used by
    /// `harvest`'s level-triggered re-arm, which re-queues
    /// for the *next* `wait` call rather than racing the one currently
    /// running.
    pub(crate) fn enqueue_ready(&mut self, entry: &Arc<InterestEntry>) {
        if entry.queued_on() == QueuedOn::None {
            self.ready.push_back(entry.clone());
            entry.set_queued_on(QueuedOn::Ready);
        }
    }

    /// Removes `entry` from whichever of the two lists it is linked into,
    /// if any. Used by `DELETE` and by the source release hook's removal
    /// path to keep a freed entry from lingering on either list.
    pub(crate) fn unlink(&mut self, entry: &Arc<InterestEntry>) {
        match entry.queued_on() {
            QueuedOn::Ready => self.ready.retain(|e| !Arc::ptr_eq(e, entry)),
            QueuedOn::Overflow => {
                if let Overflow::Active(chain) = &mut self.overflow {
                    chain.retain(|e| !Arc::ptr_eq(e, entry));
                }
            }
            QueuedOn::None => {}
        }
        entry.set_queued_on(QueuedOn::None);
    }
}
