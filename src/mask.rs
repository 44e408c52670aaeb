// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;

bitflags! {
    /// A bitset of readiness events plus two delivery-policy bits.
    ///
    /// `ONESHOT` and `EDGE` never describe source state; they describe how
    /// the entry should be re-armed after a delivery.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u16 {
        /// The source has data ready to read.
        const READABLE = 1 << 0;
        /// The source can accept a write without blocking.
        const WRITABLE = 1 << 1;
        /// Urgent/out-of-band data is available.
        const PRIORITY = 1 << 2;
        /// The source reported an error condition.
        const ERROR = 1 << 3;
        /// The source's peer hung up.
        const HANGUP = 1 << 4;
        /// After one delivery, disable the entry until an explicit `MODIFY`.
        const ONESHOT = 1 << 5;
        /// Do not re-queue the entry after delivery while it is still ready.
        const EDGE = 1 << 6;
    }
}

/// Bits that select delivery policy rather than a readiness condition.
const POLICY_BITS: EventMask = EventMask::ONESHOT.union(EventMask::EDGE);

impl EventMask {
    /// The subset of `self` that is a condition, not a policy bit.
    pub const fn requested_events(self) -> EventMask {
        self.difference(POLICY_BITS)
    }

    /// True once `requested_events` is empty: a one-shot entry after its
    /// single delivery, awaiting re-arm via `MODIFY`.
    pub const fn is_disabled(self) -> bool {
        self.requested_events().is_empty()
    }

    /// True if this mask carries the `ONESHOT` policy bit.
    pub const fn is_oneshot(self) -> bool {
        self.contains(EventMask::ONESHOT)
    }

    /// True if this mask carries the `EDGE` policy bit.
    pub const fn is_edge(self) -> bool {
        self.contains(EventMask::EDGE)
    }

    /// Reduces `self` to just its policy bits, the state a `ONESHOT` entry
    /// is left in after its single delivery.
    pub const fn disable(self) -> EventMask {
        self.intersection(POLICY_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_bits_are_not_requested_events() {
        let m = EventMask::READABLE | EventMask::ONESHOT;
        assert_eq!(m.requested_events(), EventMask::READABLE);
        assert!(!m.is_disabled());
    }

    #[test]
    fn disable_keeps_only_policy_bits() {
        let m = EventMask::READABLE | EventMask::ONESHOT | EventMask::EDGE;
        let disabled = m.disable();
        assert!(disabled.is_disabled());
        assert!(disabled.contains(EventMask::ONESHOT));
        assert!(disabled.contains(EventMask::EDGE));
        assert!(!disabled.contains(EventMask::READABLE));
    }

    #[test]
    fn empty_requested_events_is_disabled() {
        assert!(EventMask::empty().is_disabled());
        assert!(EventMask::ONESHOT.is_disabled());
    }
}
