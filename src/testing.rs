// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Test-only [`Source`] fake: a readiness flag the test flips directly,
//! with no real I/O underneath, standing in for a real device behind the
//! trait object the way other fixtures in this codebase do.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::WaitHook;
use crate::error::EngineError;
use crate::key::SourceKey;
use crate::mask::EventMask;
use crate::release::SourceLinks;
use crate::source::Source;

/// A [`Source`] whose readiness a test controls directly via
/// [`ManualSource::set_readiness`].
pub struct ManualSource {
    key: SourceKey,
    state: AtomicU16,
    hooks: Mutex<Vec<Arc<WaitHook>>>,
    links: SourceLinks,
}

impl ManualSource {
    /// Creates a source identified by `key`, initially not ready.
    pub fn new(key: SourceKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: AtomicU16::new(0),
            hooks: Mutex::new(Vec::new()),
            links: SourceLinks::new(),
        })
    }

    /// Sets the source's current readiness and fires every installed
    /// hook with it, as a real source would on a state transition.
    pub fn set_readiness(&self, mask: EventMask) {
        self.state.store(mask.bits(), Ordering::Release);
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            hook.fire(mask);
        }
    }

    /// The number of hooks currently subscribed, for assertions about
    /// unsubscribe behavior.
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }
}

impl Source for ManualSource {
    fn source_key(&self) -> SourceKey {
        self.key
    }

    fn poll(&self, hook: Option<&Arc<WaitHook>>) -> Result<EventMask, EngineError> {
        if let Some(hook) = hook {
            self.hooks.lock().push(hook.clone());
        }
        Ok(EventMask::from_bits_truncate(self.state.load(Ordering::Acquire)))
    }

    fn unsubscribe(&self, hook: &Arc<WaitHook>) {
        self.hooks.lock().retain(|h| !Arc::ptr_eq(h, hook));
    }

    fn links(&self) -> &SourceLinks {
        &self.links
    }
}

impl Drop for ManualSource {
    /// Demonstrates the pattern any real `Source` implementation follows:
    /// call the release hook from teardown so an engine still holding
    /// this source's key learns it is gone, instead of finding out only
    /// from a quietly-failing next probe.
    fn drop(&mut self) {
        self.links.release();
    }
}
