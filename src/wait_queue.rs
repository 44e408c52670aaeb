// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A blocking wait-queue: threads park on it and are woken either
/// individually ([`wake_one_exclusive`](WaitQueue::wake_one_exclusive)) or
/// all at once ([`wake_all`](WaitQueue::wake_all)).
///
/// This is the concrete stand-in for a generic wait-queue primitive
/// specified only by its contract: `add_exclusive`, `remove`,
/// `wake_one_exclusive`, `wake_all`. Named and shaped after
/// `libs/kasync/src/sync/wait_queue.rs`'s `WaitQueue`, but blocking an OS
/// thread rather than registering a task waker, since the wait loop here
/// parks a thread, not a future.
#[derive(Debug)]
pub struct WaitQueue {
    state: Mutex<State>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct State {
    exclusive_waiters: usize,
    generation: u64,
}

/// A thread's registration on a [`WaitQueue`], returned by `add_exclusive`.
///
/// Must be passed to [`WaitQueue::remove`] exactly once, whether or not the
/// thread was actually woken, to keep `exclusive_waiters` accurate.
#[derive(Debug)]
pub struct Ticket {
    generation: u64,
}

/// Outcome of parking on a [`WaitQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// A wake call bumped the generation past the ticket's.
    Woken,
    /// The timeout elapsed with no wake observed.
    TimedOut,
}

impl WaitQueue {
    /// Creates an empty wait-queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
        }
    }

    /// Registers the calling thread as an exclusive waiter, returning a
    /// [`Ticket`] to park and later remove with.
    pub fn add_exclusive(&self) -> Ticket {
        let mut state = self.state.lock();
        state.exclusive_waiters += 1;
        Ticket {
            generation: state.generation,
        }
    }

    /// Unregisters a previously-added ticket. Idempotent with respect to
    /// the underlying count only when called once per `add_exclusive`.
    pub fn remove(&self, _ticket: Ticket) {
        let mut state = self.state.lock();
        state.exclusive_waiters = state.exclusive_waiters.saturating_sub(1);
    }

    /// True if at least one thread is currently registered as a waiter.
    pub fn has_waiters(&self) -> bool {
        self.state.lock().exclusive_waiters > 0
    }

    /// Wakes one exclusive waiter, if any are registered.
    pub fn wake_one_exclusive(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.condvar.notify_one();
    }

    /// Wakes every currently registered waiter.
    pub fn wake_all(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.condvar.notify_all();
    }

    /// Parks the calling thread until woken or `timeout` elapses (`None`
    /// blocks indefinitely). Re-checks the ticket's generation on every
    /// spurious wakeup, like the `Condvar::wait_while` idiom.
    pub fn park(&self, ticket: &Ticket, timeout: Option<Duration>) -> ParkOutcome {
        let mut state = self.state.lock();
        if state.generation != ticket.generation {
            return ParkOutcome::Woken;
        }
        match timeout {
            None => {
                self.condvar
                    .wait_while(&mut state, |s| s.generation == ticket.generation);
                ParkOutcome::Woken
            }
            Some(budget) => {
                let deadline = Instant::now() + budget;
                loop {
                    if state.generation != ticket.generation {
                        return ParkOutcome::Woken;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return ParkOutcome::TimedOut;
                    }
                    let (guard, timed_out) =
                        self.condvar.wait_for(&mut state, deadline - now);
                    state = guard;
                    if state.generation != ticket.generation {
                        return ParkOutcome::Woken;
                    }
                    if timed_out.timed_out() {
                        return ParkOutcome::TimedOut;
                    }
                }
            }
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wake_one_releases_a_single_parked_thread() {
        let queue = Arc::new(WaitQueue::new());
        let q2 = queue.clone();
        let handle = thread::spawn(move || {
            let ticket = q2.add_exclusive();
            let outcome = q2.park(&ticket, Some(Duration::from_secs(5)));
            q2.remove(ticket);
            outcome
        });

        while !queue.has_waiters() {
            thread::yield_now();
        }
        queue.wake_one_exclusive();
        assert_eq!(handle.join().unwrap(), ParkOutcome::Woken);
    }

    #[test]
    fn park_times_out_without_a_wake() {
        let queue = WaitQueue::new();
        let ticket = queue.add_exclusive();
        let outcome = queue.park(&ticket, Some(Duration::from_millis(20)));
        queue.remove(ticket);
        assert_eq!(outcome, ParkOutcome::TimedOut);
    }

    #[test]
    fn wake_before_park_is_observed_immediately() {
        let queue = WaitQueue::new();
        let ticket = queue.add_exclusive();
        queue.wake_one_exclusive();
        let outcome = queue.park(&ticket, Some(Duration::from_millis(20)));
        queue.remove(ticket);
        assert_eq!(outcome, ParkOutcome::Woken);
    }
}
