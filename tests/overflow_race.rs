// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Exercises the overflow path against the real `Engine`: a wakeup for one
//! entry racing a genuinely in-progress harvest of a different entry.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use evready::testing::ManualSource;
use evready::{
    ControlOp, Engine, EngineError, EventMask, EventRecord, OwnerId, OwnerRegistry, Source,
    SourceKey, SourceLinks, WaitHook,
};

/// A [`Source`] whose `poll` deliberately takes a while, so a test can
/// reliably land a second entry's wakeup while this one's harvest is
/// still in flight.
struct SlowSource {
    key: SourceKey,
    state: AtomicU16,
    hooks: Mutex<Vec<Arc<WaitHook>>>,
    links: SourceLinks,
    delay: Duration,
}

impl SlowSource {
    fn new(key: SourceKey, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: AtomicU16::new(0),
            hooks: Mutex::new(Vec::new()),
            links: SourceLinks::new(),
            delay,
        })
    }

    fn set_readiness(&self, mask: EventMask) {
        self.state.store(mask.bits(), Ordering::Release);
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            hook.fire(mask);
        }
    }
}

impl Source for SlowSource {
    fn source_key(&self) -> SourceKey {
        self.key
    }

    fn poll(&self, hook: Option<&Arc<WaitHook>>) -> Result<EventMask, EngineError> {
        thread::sleep(self.delay);
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

fn new_engine() -> Engine {
    Engine::new(OwnerId(1), Arc::new(OwnerRegistry::new(64)))
}

fn out_buf(n: usize) -> Vec<EventRecord> {
    vec![
        EventRecord {
            events: EventMask::empty(),
            cookie: 0,
        };
        n
    ]
}

#[test]
fn overflow_wakeup_during_harvest_is_delivered_exactly_once() {
    let engine = new_engine();
    let slow = SlowSource::new(SourceKey::new(1, 0), Duration::from_millis(150));
    let fast = ManualSource::new(SourceKey::new(2, 0));

    engine
        .control(ControlOp::Add, slow.clone(), 1, EventMask::READABLE)
        .unwrap();
    engine
        .control(ControlOp::Add, fast.clone(), 2, EventMask::READABLE)
        .unwrap();

    slow.set_readiness(EventMask::READABLE);

    let waiter = engine.clone();
    let handle = thread::spawn(move || {
        let mut out = out_buf(4);
        let n = waiter
            .wait(&mut out, Some(Duration::from_secs(2)))
            .unwrap();
        (n, out[0].cookie)
    });

    // Give the waiting thread time to steal `ready` and enter `slow`'s
    // 150ms re-probe before firing a wakeup for an unrelated entry.
    thread::sleep(Duration::from_millis(40));
    fast.set_readiness(EventMask::READABLE);

    let (n, cookie) = handle.join().unwrap();
    assert_eq!(n, 1, "only the slow entry's harvest was in flight");
    assert_eq!(cookie, 1);

    // The race-landed wakeup for `fast` must still surface, exactly once,
    // on a later wait.
    let mut out = out_buf(4);
    let n = engine.wait(&mut out, Some(Duration::from_millis(500))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(out[0].cookie, 2);

    let n = engine.wait(&mut out, Some(Duration::from_millis(50))).unwrap();
    assert_eq!(n, 0, "fast's readiness must not be delivered a second time");
}
