// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::thread::ThreadId;

use spin::Mutex;

use crate::error::EngineError;

/// Bound on simultaneously active nested invocations per execution context.
pub const MAX_NESTS: usize = 4;

/// A process-wide, per-context recursion limiter.
///
/// Used by the safe-wakeup path (cookie = the target wait-queue's identity)
/// and the cross-engine poll-readiness path (cookie = the target engine's
/// identity) to bound reentrancy: one call per (`cookie`, `ctx`) pair is
/// live at a time, and no more than [`MAX_NESTS`] calls for the same `ctx`
/// are live simultaneously, regardless of cookie.
///
/// `ctx` stands in for a per-CPU execution context (compare
/// `libs/cpu-local`); hosted on `std`, the nearest equivalent identity is
/// the calling thread's [`ThreadId`].
#[derive(Debug, Default)]
pub struct NestingGuard {
    active: Mutex<Vec<(u64, ThreadId)>>,
}

impl NestingGuard {
    /// Creates an empty guard.
    pub const fn new() -> Self {
        Self {
            active: Mutex::new(Vec::new()),
        }
    }

    /// Runs `f` under the guard's reentrancy bound.
    ///
    /// Fails with [`EngineError::LoopOrDepth`] if `(cookie, ctx)` is already
    /// active (a cycle), or if `ctx` already has [`MAX_NESTS`] other active
    /// calls (too deep). On success, `f` receives the 1-based depth of this
    /// call within `ctx`.
    pub fn call_nested<F, R>(&self, cookie: u64, ctx: ThreadId, f: F) -> Result<R, EngineError>
    where
        F: FnOnce(usize) -> R,
    {
        let depth = {
            let mut active = self.active.lock();
            let mut same_ctx = 0usize;
            for &(c, t) in active.iter() {
                if t == ctx {
                    if c == cookie {
                        return Err(EngineError::LoopOrDepth);
                    }
                    same_ctx += 1;
                }
            }
            if same_ctx >= MAX_NESTS {
                return Err(EngineError::LoopOrDepth);
            }
            active.push((cookie, ctx));
            same_ctx + 1
        };

        let result = f(depth);

        let mut active = self.active.lock();
        if let Some(pos) = active.iter().position(|&(c, t)| c == cookie && t == ctx) {
            active.remove(pos);
        }

        Ok(result)
    }
}
