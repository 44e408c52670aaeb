// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::engine::Inner;
use crate::key::SourceKey;
use crate::mask::EventMask;
use crate::owner::OwnerId;
use crate::queue::QueuedOn;
use crate::source::Source;

/// One (engine, source) registration.
///
/// `Arc`-shared rather than intrusively linked: see DESIGN.md, Open
/// Question 1. `mask`, `cookie` and `queued_on` are atomics because they
/// are read from the wakeup callback, which only holds `fast_lock`, not
/// `transfer_mutex` — matching how other hot-path lock state in this
/// codebase (e.g. `libs/sync/src/raw_mutex.rs`'s `AtomicBool` lock state)
/// stays a bare atomic rather than a lock-guarded field.
///
/// `source` is held weakly, not owned: a source may be destroyed while
/// still registered, and its own teardown reaches back in via
/// `release.rs`'s `SourceLinks::release` — which is also why `engine` is
/// a back-pointer here rather than only on `WaitHook`, so that release
/// path can find this entry's engine without a live hook to go through.
pub(crate) struct InterestEntry {
    pub(crate) key: SourceKey,
    pub(crate) owner: OwnerId,
    pub(crate) source: Weak<dyn Source>,
    pub(crate) engine: Weak<Inner>,
    mask_bits: AtomicU8,
    cookie: AtomicU64,
    queued_on: AtomicU8,
    hooks: Mutex<Vec<Arc<WaitHook>>>,
}

const QUEUED_NONE: u8 = 0;
const QUEUED_READY: u8 = 1;
const QUEUED_OVERFLOW: u8 = 2;

impl InterestEntry {
    pub(crate) fn new(
        key: SourceKey,
        owner: OwnerId,
        source: &Arc<dyn Source>,
        engine: &Arc<Inner>,
        mask: EventMask,
        cookie: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            owner,
            source: Arc::downgrade(source),
            engine: Arc::downgrade(engine),
            mask_bits: AtomicU8::new(mask.bits() as u8),
            cookie: AtomicU64::new(cookie),
            queued_on: AtomicU8::new(QUEUED_NONE),
            hooks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn mask(&self) -> EventMask {
        EventMask::from_bits_truncate(self.mask_bits.load(Ordering::Acquire) as u16)
    }

    /// Updates the mask. Callers must do this *before* re-probing the
    /// source, so a racing wakeup either observes the new mask or
    /// re-probes against it — never misses it.
    pub(crate) fn set_mask(&self, mask: EventMask) {
        self.mask_bits.store(mask.bits() as u8, Ordering::Release);
    }

    pub(crate) fn requested_events(&self) -> EventMask {
        self.mask().requested_events()
    }

    pub(crate) fn cookie(&self) -> u64 {
        self.cookie.load(Ordering::Acquire)
    }

    pub(crate) fn set_cookie(&self, cookie: u64) {
        self.cookie.store(cookie, Ordering::Release);
    }

    pub(crate) fn queued_on(&self) -> QueuedOn {
        match self.queued_on.load(Ordering::Acquire) {
            QUEUED_READY => QueuedOn::Ready,
            QUEUED_OVERFLOW => QueuedOn::Overflow,
            _ => QueuedOn::None,
        }
    }

    pub(crate) fn set_queued_on(&self, state: QueuedOn) {
        let bits = match state {
            QueuedOn::None => QUEUED_NONE,
            QueuedOn::Ready => QUEUED_READY,
            QueuedOn::Overflow => QUEUED_OVERFLOW,
        };
        self.queued_on.store(bits, Ordering::Release);
    }

    pub(crate) fn push_hook(&self, hook: Arc<WaitHook>) {
        self.hooks.lock().push(hook);
    }

    /// Tears down every `WaitHook` subscribed on behalf of this entry.
    /// Called by `DELETE` and by engine teardown, both *without*
    /// `fast_lock` held. A no-op if the source has already been dropped —
    /// there is nothing left to unsubscribe from.
    pub(crate) fn unregister_hooks(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        if let Some(source) = self.source.upgrade() {
            for hook in hooks {
                source.unsubscribe(&hook);
            }
        }
    }
}

/// A subscription to one source's wait-queue, owned by the [`InterestEntry`]
/// it was installed for.
///
/// Sources hold `Arc<WaitHook>` in whatever internal subscriber list they
/// keep, and invoke [`WaitHook::fire`] with the current event bits when
/// their readiness changes — the engine-supplied WaitHook installer a
/// source implementation is expected to call back into.
pub struct WaitHook {
    entry: Weak<InterestEntry>,
    engine: Weak<Inner>,
}

impl WaitHook {
    pub(crate) fn new(entry: &Arc<InterestEntry>, engine: &Arc<Inner>) -> Arc<Self> {
        Arc::new(Self {
            entry: Arc::downgrade(entry),
            engine: Arc::downgrade(engine),
        })
    }

    /// Delivers a readiness transition to the subscribed entry.
    ///
    /// `events` may be empty if the source cannot report per-event deltas;
    /// an empty mask is treated as matching whatever the entry currently
    /// requests, rather than as "nothing matched".
    pub fn fire(&self, events: EventMask) {
        let (Some(entry), Some(engine)) = (self.entry.upgrade(), self.engine.upgrade()) else {
            return;
        };
        engine.on_wakeup(entry, events);
    }
}
