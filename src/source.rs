// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use crate::entry::WaitHook;
use crate::error::EngineError;
use crate::key::SourceKey;
use crate::mask::EventMask;
use crate::release::SourceLinks;

/// The capability an external I/O source must expose to be registered
/// with an [`Engine`](crate::Engine).
///
/// This is the concrete form of the source capability: `poll(source,
/// wait_ctx) -> event_mask`, plus wait-queue subscription. When `hook` is
/// `Some`, the source must retain
/// it (in whatever subscriber list it keeps) and call
/// [`WaitHook::fire`](crate::WaitHook::fire) on every future readiness
/// transition, until [`unsubscribe`](Source::unsubscribe) is called for
/// that same hook.
///
/// [`Engine`] itself implements `Source`, so one engine can be registered
/// inside another.
pub trait Source: Send + Sync {
    /// This source's identity for registration purposes.
    fn source_key(&self) -> SourceKey;

    /// Returns the source's current readiness. If `hook` is `Some`,
    /// installs it as a standing subscription for future transitions.
    ///
    /// Returns [`EngineError::LoopOrDepth`] if this source is itself an
    /// engine and polling it would exceed the bounded-nesting limit or
    /// close a cycle; returns [`EngineError::OutOfMemory`] if
    /// installing the subscription failed.
    fn poll(&self, hook: Option<&Arc<WaitHook>>) -> Result<EventMask, EngineError>;

    /// Removes a previously installed subscription. Called with `fast_lock`
    /// *not* held; must not deadlock against a concurrent
    /// wakeup callback.
    fn unsubscribe(&self, hook: &Arc<WaitHook>);

    /// Sources that are themselves engines expose whatever they currently
    /// have registered, so `ADD` can walk the monitoring graph structurally
    /// before linking a new edge into it. Plain sources have
    /// none.
    fn nested_children(&self) -> Vec<Arc<dyn Source>> {
        Vec::new()
    }

    /// This source's per-source list of registered entries. A source
    /// implementation embeds a [`SourceLinks`] and calls
    /// [`SourceLinks::release`] from its own teardown so that registered
    /// engines learn it is gone instead of holding a dangling interest.
    fn links(&self) -> &SourceLinks;
}
