// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The [`Engine`]: the aggregate combining an interest set, the ready/overflow
//! hand-off protocol, and the two waiter wait-queues.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SleepMutex;
use spin::Mutex as SpinMutex;

use crate::entry::{InterestEntry, WaitHook};
use crate::error::EngineError;
use crate::global::global;
use crate::key::SourceKey;
use crate::mask::EventMask;
use crate::owner::{OwnerId, OwnerRegistry};
use crate::queue::{FastState, Overflow, QueuedOn};
use crate::signal;
use crate::source::Source;

/// Which control operation to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Register a new source.
    Add,
    /// Update the mask/cookie of an existing registration.
    Modify,
    /// Remove a registration.
    Delete,
}

/// One delivered event: the bits that were ready, and the cookie the
/// caller originally supplied for that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// The readiness bits observed for this source.
    pub events: EventMask,
    /// The caller-opaque value supplied at registration time.
    pub cookie: u64,
}

/// The event-readiness engine.
///
/// Cheaply cloneable: clones share the same underlying state, the way a
/// reactor handle is shared across a runtime (compare
/// `compio-driver`'s `Key<T>`/driver handle pattern).
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

pub(crate) struct Inner {
    owner: OwnerId,
    registry: Arc<OwnerRegistry>,
    /// The interest set, plus the lock that serializes every structural
    /// change to it — this *is* `transfer_mutex`.
    set: SleepMutex<BTreeMap<SourceKey, Arc<InterestEntry>>>,
    /// `fast_lock`: non-sleeping, guards `ready`/`overflow` only.
    fast: SpinMutex<FastState>,
    waiters: crate::wait_queue::WaitQueue,
    self_wait: crate::wait_queue::WaitQueue,
    /// Other engines' `WaitHook`s subscribed to `self_wait`, installed
    /// when this engine is itself registered as a source.
    self_wait_hooks: SleepMutex<Vec<Arc<WaitHook>>>,
    /// This engine's own per-source list, used when it is itself
    /// registered as a [`Source`] inside another engine and is then
    /// dropped while still registered there.
    links: crate::release::SourceLinks,
}

impl Engine {
    /// Creates a new, empty engine belonging to `owner`, sharing `registry`
    /// for the per-owner registration cap.
    pub fn new(owner: OwnerId, registry: Arc<OwnerRegistry>) -> Self {
        Self(Arc::new(Inner {
            owner,
            registry,
            set: SleepMutex::new(BTreeMap::new()),
            fast: SpinMutex::new(FastState::default()),
            waiters: crate::wait_queue::WaitQueue::new(),
            self_wait: crate::wait_queue::WaitQueue::new(),
            self_wait_hooks: SleepMutex::new(Vec::new()),
            links: crate::release::SourceLinks::new(),
        }))
    }

    /// `ADD`, `MODIFY`, or `DELETE` a registration.
    pub fn control(
        &self,
        op: ControlOp,
        source: Arc<dyn Source>,
        cookie: u64,
        mask: EventMask,
    ) -> Result<(), EngineError> {
        match op {
            ControlOp::Add => self.0.add(&self.0, source, cookie, mask),
            ControlOp::Modify => self.0.modify(source.source_key(), cookie, mask),
            ControlOp::Delete => self.0.delete(source.source_key()),
        }
    }

    /// Blocks until at least one event is ready, `timeout` elapses, or the
    /// calling thread is interrupted.
    ///
    /// `out` bounds `max_events`; it must be non-empty. Returns the number
    /// of records written, or `0` on timeout.
    pub fn wait(&self, out: &mut [EventRecord], timeout: Option<Duration>) -> Result<usize, EngineError> {
        self.0.wait(out, timeout)
    }

    /// Polls this engine's own readiness, for use when it is registered as
    /// a source inside another engine.
    pub fn poll_self(&self, hook: Option<&Arc<WaitHook>>) -> Result<EventMask, EngineError> {
        self.0.poll_self(&self.0, hook)
    }

    /// This engine's identity when registered as a [`Source`] elsewhere.
    pub fn source_key(&self) -> SourceKey {
        self.0.source_key()
    }
}

impl Source for Engine {
    fn source_key(&self) -> SourceKey {
        self.0.source_key()
    }

    fn poll(&self, hook: Option<&Arc<WaitHook>>) -> Result<EventMask, EngineError> {
        self.0.poll_self(&self.0, hook)
    }

    fn unsubscribe(&self, hook: &Arc<WaitHook>) {
        self.0
            .self_wait_hooks
            .lock()
            .retain(|h| !Arc::ptr_eq(h, hook));
    }

    fn nested_children(&self) -> Vec<Arc<dyn Source>> {
        self.0
            .set
            .lock()
            .values()
            .filter_map(|entry| entry.source.upgrade())
            .collect()
    }

    fn links(&self) -> &crate::release::SourceLinks {
        &self.0.links
    }
}

/// Total engines permitted along any monitoring chain: the root plus up to
/// [`MAX_NESTS`](crate::nesting::MAX_NESTS) nested beneath it.
const MAX_NESTING_DEPTH: usize = crate::nesting::MAX_NESTS + 1;

impl Inner {
    fn source_key(&self) -> SourceKey {
        // An engine's stable identity is its own allocation's address —
        // pointer-equivalent, like any other source handle.
        SourceKey::new(self as *const Inner as usize, 0)
    }

    /// Registers a new source.
    fn add(
        &self,
        this: &Arc<Inner>,
        source: Arc<dyn Source>,
        cookie: u64,
        requested: EventMask,
    ) -> Result<(), EngineError> {
        let key = source.source_key();
        if key == self.source_key() {
            return Err(EngineError::InvalidArgument);
        }
        // Serializes the structural walk against concurrent ADDs elsewhere
        // in the monitoring graph, so two racing edges cannot both pass
        // the check and jointly complete a cycle.
        let _structural = global().structural_mutex.lock();
        if let Err(err) = self.check_nesting(&source) {
            tracing::debug!(handle = key.handle(), fd = key.fd(), "ADD rejected: would cycle or exceed nesting depth");
            return Err(err);
        }
        let mask = requested | EventMask::ERROR | EventMask::HANGUP;

        let mut set = self.set.lock();
        if set.contains_key(&key) {
            return Err(EngineError::AlreadyExists);
        }
        if let Err(err) = self.registry.try_acquire(self.owner) {
            tracing::debug!(owner = ?self.owner, "ADD rejected: owner quota exhausted");
            return Err(err);
        }

        let entry = InterestEntry::new(key, self.owner, &source, this, mask, cookie);
        let hook = WaitHook::new(&entry, this);
        entry.push_hook(hook.clone());

        let initial = match source.poll(Some(&hook)) {
            Ok(mask) => mask,
            Err(err) => {
                entry.unregister_hooks();
                self.registry.release(self.owner);
                return Err(err);
            }
        };

        if !(initial.requested_events() & entry.requested_events()).is_empty() {
            let mut fast = self.fast.lock();
            fast.enqueue_for_wakeup(&entry);
            drop(fast);
            self.wake_after_enqueue();
        }

        source.links().register(&entry);
        tracing::trace!(handle = key.handle(), fd = key.fd(), ?mask, "ADD registered");
        set.insert(key, entry);
        Ok(())
    }

    /// `MODIFY` updates mask/cookie before re-probing the source.
    fn modify(&self, key: SourceKey, cookie: u64, requested: EventMask) -> Result<(), EngineError> {
        let set = self.set.lock();
        let entry = set.get(&key).ok_or(EngineError::NoEntry)?.clone();
        let mask = requested | EventMask::ERROR | EventMask::HANGUP;

        entry.set_mask(mask);
        entry.set_cookie(cookie);

        let current = entry
            .source
            .upgrade()
            .and_then(|source| source.poll(None).ok())
            .unwrap_or_else(EventMask::empty);
        if !(current.requested_events() & entry.requested_events()).is_empty() {
            let mut fast = self.fast.lock();
            fast.enqueue_for_wakeup(&entry);
            drop(fast);
            self.wake_after_enqueue();
        }

        tracing::trace!(handle = key.handle(), fd = key.fd(), ?mask, "MODIFY updated");
        Ok(())
    }

    /// Removes a registration.
    ///
    /// Holds `set` (`transfer_mutex`) for the whole function, including
    /// the `fast_lock`-guarded unlink at the end: `transfer` also holds
    /// `set` for its entire duration, so releasing it early here would
    /// open a window where a concurrent harvest could steal this entry
    /// off `ready` and re-link it after `delete` has already removed it
    /// from the interest set and returned.
    fn delete(&self, key: SourceKey) -> Result<(), EngineError> {
        let mut set = self.set.lock();
        let entry = set.get(&key).ok_or(EngineError::NoEntry)?.clone();

        entry.unregister_hooks();
        if let Some(source) = entry.source.upgrade() {
            source.links().unregister(&entry);
        }
        set.remove(&key);

        let mut fast = self.fast.lock();
        fast.unlink(&entry);
        drop(fast);
        drop(set);

        self.registry.release(entry.owner);
        tracing::trace!(handle = key.handle(), fd = key.fd(), "DELETE removed");
        Ok(())
    }

    /// The tail of `DELETE` (removal from the interest set, `fast_lock`
    /// unlink, owner-count release) without the hook/`source_link`
    /// teardown steps, used by [`SourceLinks::release`](crate::release::SourceLinks::release)
    /// once a source has already detached `entry` from its own list and
    /// is tearing its own hooks down itself. Like `delete`, keeps `set`
    /// held across the `fast_lock` step.
    ///
    /// Guards against a racing plain `DELETE` for the same entry already
    /// having won: if the entry is no longer in `set`, this is a no-op
    /// rather than double-releasing the owner's quota slot.
    pub(crate) fn remove_after_source_release(&self, entry: &Arc<InterestEntry>) {
        let mut set = self.set.lock();
        let existed = set.remove(&entry.key).is_some();

        let mut fast = self.fast.lock();
        fast.unlink(entry);
        drop(fast);
        drop(set);

        if existed {
            self.registry.release(entry.owner);
        }
    }

    /// Walks `source`'s monitoring graph before linking it in, rejecting a
    /// cycle back to `self` or a chain that would exceed
    /// [`MAX_NESTING_DEPTH`]. A plain structural walk rather than a live
    /// [`NestingGuard`](crate::NestingGuard) check: it runs once, against
    /// the graph as it stands, independent of the order edges were added.
    fn check_nesting(&self, source: &Arc<dyn Source>) -> Result<(), EngineError> {
        let mut seen = vec![self.source_key()];
        Self::walk_nested(source, &mut seen)
    }

    fn walk_nested(source: &Arc<dyn Source>, seen: &mut Vec<SourceKey>) -> Result<(), EngineError> {
        let key = source.source_key();
        if seen.contains(&key) {
            return Err(EngineError::LoopOrDepth);
        }
        seen.push(key);
        if seen.len() > MAX_NESTING_DEPTH {
            return Err(EngineError::LoopOrDepth);
        }
        for child in source.nested_children() {
            Self::walk_nested(&child, seen)?;
        }
        Ok(())
    }

    /// Shared tail of `ADD`/`MODIFY`'s wakeup-on-register path and the
    /// runtime wakeup callback.
    fn wake_after_enqueue(&self) {
        let mut post_unlock_wake = false;
        if self.waiters.has_waiters() {
            self.waiters.wake_one_exclusive();
        }
        if self.self_wait.has_waiters() || !self.self_wait_hooks.lock().is_empty() {
            post_unlock_wake = true;
        }
        if post_unlock_wake {
            self.safe_wakeup_self_wait();
        }
    }

    /// The wakeup callback a [`WaitHook`] invokes.
    pub(crate) fn on_wakeup(&self, entry: Arc<InterestEntry>, events: EventMask) {
        let mut fast = self.fast.lock();

        let mask = entry.mask();
        if mask.is_disabled() {
            return;
        }

        // An empty event mask means the source could not report per-event
        // deltas, so assume a match rather than risk silently dropping
        // the wakeup.
        if !events.is_empty() && (events & mask.requested_events()).is_empty() {
            return;
        }

        fast.enqueue_for_wakeup(&entry);
        drop(fast);

        self.wake_after_enqueue();
    }

    /// The bounded-recursion wake path for `self_wait`.
    fn safe_wakeup_self_wait(&self) {
        let cookie = &self.self_wait as *const crate::wait_queue::WaitQueue as usize as u64;
        let ctx = std::thread::current().id();
        let _ = global().wakeup_guard.call_nested(cookie, ctx, |_depth| {
            self.self_wait.wake_all();
            let hooks = self.self_wait_hooks.lock().clone();
            for hook in hooks {
                hook.fire(EventMask::READABLE);
            }
        });
    }

    /// An engine is itself pollable. Bounded by the poll-readiness
    /// `NestingGuard` so a monitoring cycle or over-deep chain is rejected
    /// before it recurses.
    fn poll_self(
        &self,
        this: &Arc<Inner>,
        hook: Option<&Arc<WaitHook>>,
    ) -> Result<EventMask, EngineError> {
        let cookie = this.as_ref() as *const Inner as usize as u64;
        let ctx = std::thread::current().id();
        if let Some(hook) = hook {
            self.self_wait_hooks.lock().push(hook.clone());
        }
        global()
            .poll_guard
            .call_nested(cookie, ctx, |_depth| self.scan_ready())
    }

    fn scan_ready(&self) -> EventMask {
        let set = self.set.lock();
        for entry in set.values() {
            let Some(source) = entry.source.upgrade() else {
                continue;
            };
            let polled = source.poll(None).unwrap_or_else(|_| EventMask::empty());
            if !(polled & entry.requested_events()).is_empty() {
                return EventMask::READABLE;
            }
        }
        EventMask::empty()
    }

    /// Blocks until at least one event is ready, `timeout` elapses, or the
    /// calling thread is interrupted.
    fn wait(&self, out: &mut [EventRecord], timeout: Option<Duration>) -> Result<usize, EngineError> {
        if out.is_empty() {
            return Err(EngineError::InvalidArgument);
        }
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            let anything_ready = {
                let fast = self.fast.lock();
                !fast.ready.is_empty() || matches!(fast.overflow, Overflow::Active(_))
            };

            if !anything_ready {
                let ticket = self.waiters.add_exclusive();
                // Re-check now that we're registered, to close the race
                // between the snapshot above and `add_exclusive`.
                let still_empty = {
                    let fast = self.fast.lock();
                    fast.ready.is_empty() && !matches!(fast.overflow, Overflow::Active(_))
                };

                if !still_empty {
                    self.waiters.remove(ticket);
                    continue;
                }

                if signal::take_pending() {
                    self.waiters.remove(ticket);
                    return Err(EngineError::Interrupted);
                }

                let park_timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                if matches!(park_timeout, Some(d) if d.is_zero()) {
                    self.waiters.remove(ticket);
                    return Ok(0);
                }

                let outcome = self.waiters.park(&ticket, park_timeout);
                self.waiters.remove(ticket);

                if signal::take_pending() {
                    return Err(EngineError::Interrupted);
                }
                if outcome == crate::wait_queue::ParkOutcome::TimedOut {
                    return Ok(0);
                }
                continue;
            }

            let (count, err) = self.transfer(out);
            if let Some(err) = err {
                if count > 0 {
                    return Ok(count);
                }
                return Err(err);
            }
            if count > 0 {
                return Ok(count);
            }
            // Every harvested entry was spurious; retry if there's still budget.
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(0);
                }
            }
        }
    }

    /// The transfer phase: steal `ready`, activate `overflow`,
    /// harvest without holding `fast_lock`, then drain overflow back into
    /// `ready` and re-inject whatever `harvest` didn't finish.
    fn transfer(&self, out: &mut [EventRecord]) -> (usize, Option<EngineError>) {
        let _set_guard = self.set.lock();

        let local_list = {
            let mut fast = self.fast.lock();
            let local = std::mem::take(&mut fast.ready);
            fast.overflow = Overflow::Active(Vec::new());
            // Taking `ready` leaves every one of its entries with a stale
            // `Ready` flag even though they are no longer physically linked
            // anywhere; clear it now so a racing wakeup (which would land in
            // `overflow`, now active) or this harvest's own re-arm can link
            // them again without `enqueue_for_wakeup`/`enqueue_ready`
            // mistaking the stale flag for "already queued".
            for entry in &local {
                entry.set_queued_on(QueuedOn::None);
            }
            local
        };

        let (count, leftover, rearm) = self.harvest(local_list, out);

        {
            let mut fast = self.fast.lock();
            // Overflow members are already uniquely linked there (never in
            // `ready` at the same time, by `enqueue_for_wakeup`'s dedup), so
            // move them across unconditionally rather than through the
            // None-only check `enqueue_ready` otherwise applies.
            //
            // Order matters for fairness: entries this harvest never got to
            // (`leftover`) go first, ahead of entries it just served and is
            // re-arming (`rearm`), so a small caller buffer cannot starve
            // the tail of a large interest set.
            if let Overflow::Active(chain) = std::mem::replace(&mut fast.overflow, Overflow::Inactive) {
                for e in chain {
                    e.set_queued_on(QueuedOn::Ready);
                    fast.ready.push_back(e);
                }
            }
            for e in leftover {
                fast.enqueue_ready(&e);
            }
            for e in rearm {
                fast.enqueue_ready(&e);
            }
            if !fast.ready.is_empty() {
                if self.waiters.has_waiters() {
                    self.waiters.wake_one_exclusive();
                }
                if self.self_wait.has_waiters() || !self.self_wait_hooks.lock().is_empty() {
                    drop(fast);
                    self.safe_wakeup_self_wait();
                }
            }
        }

        (count, None)
    }

    /// Polls each collected entry and writes matching events into `out`.
    /// Runs without `fast_lock` held: each entry's source may block
    /// briefly on its own re-probe, and the caller's buffer copy happens
    /// here too, neither of which should stall a concurrent wakeup.
    fn harvest(
        &self,
        mut local_list: VecDeque<Arc<InterestEntry>>,
        out: &mut [EventRecord],
    ) -> (usize, VecDeque<Arc<InterestEntry>>, Vec<Arc<InterestEntry>>) {
        let mut count = 0usize;
        let max = out.len();
        let mut rearm = Vec::new();

        while count < max {
            let Some(entry) = local_list.pop_front() else {
                break;
            };

            let polled = match entry.source.upgrade() {
                Some(source) => source.poll(None).unwrap_or_else(|_| EventMask::empty()),
                // The source is gone; its own release hook will reach in
                // and remove this entry. Drop the wakeup, same as a
                // spurious one.
                None => EventMask::empty(),
            };
            let intersection = polled & entry.requested_events();

            if intersection.is_empty() {
                // Spurious wake: drop it. Its flag is already `None` (cleared
                // when it was taken off `ready`), so the next real readiness
                // transition queues it again on its own.
                continue;
            }

            out[count] = EventRecord {
                events: intersection,
                cookie: entry.cookie(),
            };
            count += 1;

            let mask = entry.mask();
            if mask.is_oneshot() {
                // Disarm until an explicit `MODIFY`; leave the flag at
                // `None`, already cleared.
                entry.set_mask(mask.disable());
            } else if !mask.is_edge() {
                // Level-triggered: still ready, re-arm for the next wait.
                rearm.push(entry);
            }
            // Edge-triggered and not disabled: leave it at `None` until the
            // source's own next wakeup re-queues it.
        }

        (count, local_list, rearm)
    }
}

impl Drop for Inner {
    /// Engine teardown, run when the last `Engine` handle sharing this
    /// `Inner` drops. Two directions, run back to back rather than under
    /// one `structural_mutex` acquisition, since `self.links.release()`
    /// takes that lock itself:
    ///
    /// - as a [`Source`] registered inside other engines, detaches itself
    ///   from each of them via its own per-source list, the same path any
    ///   other source's teardown uses;
    /// - as an engine in its own right, tears down every remaining entry's
    ///   `WaitHook`s and detaches it from its source's per-source list,
    ///   then lets the entries themselves drop along with the interest set.
    fn drop(&mut self) {
        self.links.release();

        let _structural = global().structural_mutex.lock();
        let mut set = self.set.lock();
        for entry in set.values() {
            entry.unregister_hooks();
            if let Some(source) = entry.source.upgrade() {
                source.links().unregister(entry);
            }
        }
        set.clear();
    }
}
