// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use thiserror::Error;

/// Errors surfaced by [`Engine`](crate::Engine) operations.
///
/// Every variant is a typed result handed back to the immediate caller;
/// the engine itself never aborts the process.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// `MODIFY`/`DELETE` named a key with no registered entry.
    #[error("no entry registered for that source")]
    NoEntry,
    /// `ADD` named a key that is already registered; use `MODIFY`.
    #[error("an entry for that source already exists")]
    AlreadyExists,
    /// `ADD` would exceed the owner's `max_watches_per_owner` cap.
    #[error("owner has reached its registration quota")]
    Quota,
    /// `ADD` would create a monitoring cycle among engines, or exceed
    /// [`NestingGuard`](crate::NestingGuard)'s `MAX_NESTS` bound.
    #[error("nesting this source would exceed the depth bound or form a cycle")]
    LoopOrDepth,
    /// A malformed mask, or the source was this same engine.
    #[error("invalid argument")]
    InvalidArgument,
    /// `wait` was interrupted by a pending signal before any event arrived.
    #[error("interrupted by a pending signal")]
    Interrupted,
    /// Allocation failed while installing a `WaitHook` during `ADD`.
    #[error("allocation failure while registering with the source")]
    OutOfMemory,
    /// `harvest` could not write to the caller's buffer.
    #[error("caller buffer rejected a write")]
    FaultyBuffer,
}
