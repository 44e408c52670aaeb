// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A per-thread pending-interrupt flag, standing in for real signal
//! delivery.
//!
//! `wait` treats "the calling thread has a pending signal" as an external
//! condition it must observe, without caring how signals reach a thread in
//! the first place — that's left to the surrounding layer. This module
//! gives `wait` something concrete to observe: a thread-local flag the
//! calling thread can set on its own behalf before it parks or while
//! another call on the same thread is in flight.

use std::cell::Cell;

thread_local! {
    static PENDING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as having a pending interrupt. The next
/// [`Engine::wait`](crate::Engine::wait) call on this thread that would
/// otherwise block returns [`EngineError::Interrupted`](crate::EngineError::Interrupted)
/// instead, and the flag is cleared.
pub fn interrupt_current_thread() {
    PENDING.with(|p| p.set(true));
}

/// Checks and clears the calling thread's pending-interrupt flag.
pub(crate) fn take_pending() -> bool {
    PENDING.with(|p| p.replace(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_observed_once() {
        interrupt_current_thread();
        assert!(take_pending());
        assert!(!take_pending());
    }
}
