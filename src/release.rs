// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The source-side release hook: the path a [`Source`](crate::Source)
//! implementation's own teardown calls into, so that an entry's Engine
//! learns promptly that the source beneath it is gone instead of only
//! discovering it lazily the next time someone polls.
//!
//! `InterestEntry` holds only a `Weak` reference to its source (see
//! `entry.rs`), so a source is free to reach strong-count zero and drop
//! while still registered in one or more engines. [`SourceLinks`] is a
//! source's own per-source registration list (`source_link`'s home): a
//! source implementation embeds one, registers/unregisters through it as
//! entries come and go, and calls [`SourceLinks::release`] from its own
//! `Drop` to walk back into every engine that still references it, via
//! each entry's own `engine` back-pointer.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::entry::InterestEntry;
use crate::global::global;

/// A source's list of the [`InterestEntry`]s currently registered against
/// it, across however many engines reference it.
///
/// A [`Source`](crate::Source) implementation embeds one of these and
/// calls [`release`](SourceLinks::release) from its own destructor. Entries
/// are held weakly: this list does not keep an engine, or an entry, alive
/// by itself.
pub struct SourceLinks {
    entries: Mutex<Vec<Weak<InterestEntry>>>,
}

impl SourceLinks {
    /// Creates an empty per-source list.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, entry: &Arc<InterestEntry>) {
        self.entries.lock().push(Arc::downgrade(entry));
    }

    pub(crate) fn unregister(&self, entry: &Arc<InterestEntry>) {
        self.entries
            .lock()
            .retain(|weak| !matches!(weak.upgrade(), Some(e) if Arc::ptr_eq(&e, entry)));
    }

    /// The source-side release hook.
    ///
    /// Call this once, from the source's own teardown, after it has
    /// stopped accepting new subscriptions. For every entry still on this
    /// list: detach it here, then reach into its owning engine (via the
    /// entry's own `engine` back-pointer) under `transfer_mutex` to finish
    /// removing it, skipping WaitHook unregistration since the source is
    /// already tearing those down itself. Holds `structural_mutex` for the
    /// whole walk — the one path allowed to take it while iterating a
    /// source's list, since by this point nothing can reach these entries
    /// through the ordinary control path.
    pub fn release(&self) {
        let _structural = global().structural_mutex.lock();
        let entries = std::mem::take(&mut *self.entries.lock());
        for weak in entries {
            let Some(entry) = weak.upgrade() else {
                continue;
            };
            let Some(engine) = entry.engine.upgrade() else {
                continue;
            };
            engine.remove_after_source_release(&entry);
        }
    }
}

impl Default for SourceLinks {
    fn default() -> Self {
        Self::new()
    }
}
