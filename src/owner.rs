// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::EngineError;

/// Opaque identity of whoever owns a set of registrations, for the purpose
/// of the per-owner registration cap.
///
/// The embedding layer decides what this means — a process id, a user id,
/// a session handle — the engine only ever compares it for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

/// Tracks live `InterestEntry` counts per [`OwnerId`] against a shared cap.
///
/// This is the `max_watches_per_owner` knob: a single configurable
/// maximum, applied per owner. One registry is typically shared across every
/// [`Engine`](crate::Engine) a given owner creates.
#[derive(Debug)]
pub struct OwnerRegistry {
    max_watches_per_owner: u32,
    counts: Mutex<HashMap<OwnerId, u32>>,
}

impl OwnerRegistry {
    /// Creates a registry with the given per-owner cap. Must be `>= 1`.
    pub fn new(max_watches_per_owner: u32) -> Self {
        assert!(
            max_watches_per_owner >= 1,
            "max_watches_per_owner must be at least 1"
        );
        Self {
            max_watches_per_owner,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves one registration slot for `owner`, failing with
    /// [`EngineError::Quota`] if the owner is already at the cap.
    pub fn try_acquire(&self, owner: OwnerId) -> Result<(), EngineError> {
        let mut counts = self.counts.lock();
        let slot = counts.entry(owner).or_insert(0);
        if *slot >= self.max_watches_per_owner {
            return Err(EngineError::Quota);
        }
        *slot += 1;
        Ok(())
    }

    /// Releases one registration slot previously reserved for `owner`.
    pub fn release(&self, owner: OwnerId) {
        let mut counts = self.counts.lock();
        if let Some(slot) = counts.get_mut(&owner) {
            *slot = slot.saturating_sub(1);
            if *slot == 0 {
                counts.remove(&owner);
            }
        }
    }

    /// The number of entries currently charged to `owner`.
    pub fn count(&self, owner: OwnerId) -> u32 {
        self.counts.lock().get(&owner).copied().unwrap_or(0)
    }
}
