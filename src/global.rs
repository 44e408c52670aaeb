// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::nesting::NestingGuard;

/// Process-wide state shared by every [`Engine`](crate::Engine): the
/// global mutex serializing source-driven mass removal against engine
/// teardown, and the two [`NestingGuard`]s used by the
/// safe-wakeup and cross-engine poll-readiness paths.
///
/// Lazily initialized on first use and never torn down — treated as a
/// singleton constructed before the first `Engine`.
pub(crate) struct GlobalState {
    /// Orders above every per-engine lock; held while a source extracts
    /// itself from every engine that references it, and while an
    /// engine tears itself down.
    pub(crate) structural_mutex: Mutex<()>,
    /// Guards the safe-wakeup path: `cookie` is the target wait-queue's
    /// identity.
    pub(crate) wakeup_guard: NestingGuard,
    /// Guards the cross-engine poll-readiness path: `cookie` is the
    /// target engine's identity.
    pub(crate) poll_guard: NestingGuard,
}

static GLOBAL: OnceLock<GlobalState> = OnceLock::new();

/// Returns the process-wide singleton, initializing it on first call.
pub(crate) fn global() -> &'static GlobalState {
    GLOBAL.get_or_init(|| GlobalState {
        structural_mutex: Mutex::new(()),
        wakeup_guard: NestingGuard::new(),
        poll_guard: NestingGuard::new(),
    })
}
