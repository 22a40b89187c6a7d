// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process fake of the platform-services library.
//
// Real FIFO queues, fake event records keyed by synthetic handles, and a
// `drain` helper that simulates the native library servicing a channel
// (delivering queued events, firing queued trampolines). Tests run entirely
// against this backend; hosts without the shared library can too.
//
// The fake enforces the same status convention as the real library: 0/-1
// returns with a queryable last-error code. It deliberately does NOT guard
// against double-frees or consumed tokens — those disciplines belong to the
// layers above, and the tests exercise them there.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::sync::Mutex;

use tracing::debug;

use funkwerk_core::types::{PS_FAILURE, PS_SUCCESS};

use super::{NativeServices, RawEvent};
use crate::closure::{StatusTrampoline, UnitTrampoline};

/// Platform error codes the fake reports through `last_error`.
pub const ERR_INIT_FAILED: i32 = 1;
pub const ERR_NOT_INITIALIZED: i32 = 2;
pub const ERR_NO_SUCH_CHANNEL: i32 = 3;
pub const ERR_EXEC_REFUSED: i32 = 4;
pub const ERR_NO_SUCH_EVENT: i32 = 5;
pub const ERR_HANDLER_REFUSED: i32 = 6;

enum Queued {
    Event(RawEvent),
    Exec(UnitTrampoline, usize),
}

struct State {
    initialized: bool,
    init_count: u32,
    shutdown_count: u32,
    last_error: i32,
    fail_next_init: bool,
    fail_next_exec: bool,
    fail_next_handler: bool,
    next_channel: i32,
    next_domain: i32,
    next_event: usize,
    channels: HashMap<i32, VecDeque<Queued>>,
    active: i32,
    events: HashMap<RawEvent, (i32, u32)>,
    shutdown_handlers: Vec<(StatusTrampoline, usize)>,
    destroy_handlers: Vec<(StatusTrampoline, usize)>,
}

/// Fake platform-services backend.
pub struct MockServices {
    inner: Mutex<State>,
}

impl Default for MockServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServices {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State {
                initialized: false,
                init_count: 0,
                shutdown_count: 0,
                last_error: 0,
                fail_next_init: false,
                fail_next_exec: false,
                fail_next_handler: false,
                next_channel: 1,
                next_domain: 1,
                // Synthetic event handles start well away from zero, the
                // "released" sentinel.
                next_event: 0x1000,
                channels: HashMap::new(),
                active: -1,
                events: HashMap::new(),
                shutdown_handlers: Vec::new(),
                destroy_handlers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- test knobs -------------------------------------------------------

    /// Make the next `initialize` call fail.
    pub fn fail_next_init(&self) {
        self.lock().fail_next_init = true;
    }

    /// Make the next `channel_exec` call fail.
    pub fn fail_next_exec(&self) {
        self.lock().fail_next_exec = true;
    }

    /// Make the next handler registration call fail.
    pub fn fail_next_handler_registration(&self) {
        self.lock().fail_next_handler = true;
    }

    // -- observers --------------------------------------------------------

    pub fn init_count(&self) -> u32 {
        self.lock().init_count
    }

    pub fn shutdown_count(&self) -> u32 {
        self.lock().shutdown_count
    }

    /// Number of fake event records not yet destroyed.
    pub fn live_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Queue depth of a channel, or `None` if it does not exist.
    pub fn queued(&self, id: i32) -> Option<usize> {
        self.lock().channels.get(&id).map(VecDeque::len)
    }

    // -- native-side simulation -------------------------------------------

    /// Service a channel the way the native library would: pop every queued
    /// item in FIFO order, fire queued trampolines, and return delivered
    /// events (borrowed — the caller must not destroy them).
    pub fn drain(&self, id: i32) -> Vec<RawEvent> {
        let work: Vec<Queued> = {
            let mut state = self.lock();
            match state.channels.get_mut(&id) {
                Some(queue) => queue.drain(..).collect(),
                None => Vec::new(),
            }
        };

        // Trampolines run outside the lock; they re-enter the closure
        // registry and may call back into this backend.
        let mut delivered = Vec::new();
        for item in work {
            match item {
                Queued::Event(event) => delivered.push(event),
                Queued::Exec(trampoline, data) => trampoline(data as *mut c_void),
            }
        }
        delivered
    }
}

impl NativeServices for MockServices {
    fn initialize(&self) -> i32 {
        let mut state = self.lock();
        if state.fail_next_init {
            state.fail_next_init = false;
            state.last_error = ERR_INIT_FAILED;
            return PS_FAILURE;
        }
        state.initialized = true;
        state.init_count += 1;
        debug!(count = state.init_count, "mock platform services initialized");
        PS_SUCCESS
    }

    fn shutdown(&self) -> i32 {
        let handlers = {
            let mut state = self.lock();
            if !state.initialized {
                state.last_error = ERR_NOT_INITIALIZED;
                return PS_FAILURE;
            }
            state.initialized = false;
            state.shutdown_count += 1;
            state.channels.clear();
            state.active = -1;
            std::mem::take(&mut state.shutdown_handlers)
        };
        for (trampoline, data) in handlers {
            trampoline(data as *mut c_void);
        }
        PS_SUCCESS
    }

    fn last_error(&self) -> i32 {
        self.lock().last_error
    }

    fn channel_create(&self, out_id: &mut i32) -> i32 {
        let mut state = self.lock();
        if !state.initialized {
            state.last_error = ERR_NOT_INITIALIZED;
            return PS_FAILURE;
        }
        let id = state.next_channel;
        state.next_channel += 1;
        state.channels.insert(id, VecDeque::new());
        *out_id = id;
        PS_SUCCESS
    }

    fn channel_destroy(&self, id: i32) -> i32 {
        let handlers = {
            let mut state = self.lock();
            if state.channels.remove(&id).is_none() {
                state.last_error = ERR_NO_SUCH_CHANNEL;
                return PS_FAILURE;
            }
            if state.active == id {
                state.active = -1;
            }
            state.destroy_handlers.clone()
        };
        for (trampoline, data) in handlers {
            trampoline(data as *mut c_void);
        }
        PS_SUCCESS
    }

    fn channel_get_active(&self) -> i32 {
        self.lock().active
    }

    fn channel_set_active(&self, id: i32) -> i32 {
        let mut state = self.lock();
        if !state.channels.contains_key(&id) {
            state.last_error = ERR_NO_SUCH_CHANNEL;
            return PS_FAILURE;
        }
        state.active = id;
        PS_SUCCESS
    }

    fn channel_push_event(&self, id: i32, event: RawEvent) -> i32 {
        let mut state = self.lock();
        match state.channels.get_mut(&id) {
            Some(queue) => {
                queue.push_back(Queued::Event(event));
                PS_SUCCESS
            }
            None => {
                state.last_error = ERR_NO_SUCH_CHANNEL;
                PS_FAILURE
            }
        }
    }

    fn channel_exec(&self, id: i32, trampoline: UnitTrampoline, data: usize) -> i32 {
        let mut state = self.lock();
        if state.fail_next_exec {
            state.fail_next_exec = false;
            state.last_error = ERR_EXEC_REFUSED;
            return PS_FAILURE;
        }
        match state.channels.get_mut(&id) {
            Some(queue) => {
                queue.push_back(Queued::Exec(trampoline, data));
                PS_SUCCESS
            }
            None => {
                state.last_error = ERR_NO_SUCH_CHANNEL;
                PS_FAILURE
            }
        }
    }

    fn register_shutdown_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32 {
        let mut state = self.lock();
        if state.fail_next_handler {
            state.fail_next_handler = false;
            state.last_error = ERR_HANDLER_REFUSED;
            return PS_FAILURE;
        }
        state.shutdown_handlers.push((trampoline, data));
        PS_SUCCESS
    }

    fn register_channel_destroy_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32 {
        let mut state = self.lock();
        if state.fail_next_handler {
            state.fail_next_handler = false;
            state.last_error = ERR_HANDLER_REFUSED;
            return PS_FAILURE;
        }
        state.destroy_handlers.push((trampoline, data));
        PS_SUCCESS
    }

    fn event_create(&self, domain: i32, code: u32, out: &mut RawEvent) -> i32 {
        let mut state = self.lock();
        if !state.initialized {
            state.last_error = ERR_NOT_INITIALIZED;
            return PS_FAILURE;
        }
        let handle = state.next_event;
        state.next_event += 1;
        state.events.insert(handle, (domain, code));
        *out = handle;
        PS_SUCCESS
    }

    fn event_destroy(&self, event: RawEvent) -> i32 {
        let mut state = self.lock();
        if state.events.remove(&event).is_none() {
            state.last_error = ERR_NO_SUCH_EVENT;
            return PS_FAILURE;
        }
        PS_SUCCESS
    }

    fn event_domain(&self, event: RawEvent) -> i32 {
        match self.lock().events.get(&event) {
            Some(&(domain, _)) => domain,
            None => -1,
        }
    }

    fn event_code(&self, event: RawEvent) -> u32 {
        match self.lock().events.get(&event) {
            Some(&(_, code)) => code,
            None => 0,
        }
    }

    fn register_domain(&self) -> i32 {
        let mut state = self.lock();
        if !state.initialized {
            state.last_error = ERR_NOT_INITIALIZED;
            return PS_FAILURE;
        }
        let domain = state.next_domain;
        state.next_domain += 1;
        domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn initialize_then_shutdown() {
        let mock = MockServices::new();
        assert_eq!(mock.initialize(), PS_SUCCESS);
        assert_eq!(mock.init_count(), 1);
        assert_eq!(mock.shutdown(), PS_SUCCESS);
        assert_eq!(mock.shutdown_count(), 1);
    }

    #[test]
    fn shutdown_without_init_fails_with_code() {
        let mock = MockServices::new();
        assert_eq!(mock.shutdown(), PS_FAILURE);
        assert_eq!(mock.last_error(), ERR_NOT_INITIALIZED);
    }

    #[test]
    fn init_failure_knob() {
        let mock = MockServices::new();
        mock.fail_next_init();
        assert_eq!(mock.initialize(), PS_FAILURE);
        assert_eq!(mock.last_error(), ERR_INIT_FAILED);
        // Knob is one-shot.
        assert_eq!(mock.initialize(), PS_SUCCESS);
    }

    #[test]
    fn events_are_delivered_in_fifo_order() {
        let mock = MockServices::new();
        mock.initialize();
        let mut id = 0;
        assert_eq!(mock.channel_create(&mut id), PS_SUCCESS);

        let mut first = 0;
        let mut second = 0;
        mock.event_create(3, 10, &mut first);
        mock.event_create(3, 11, &mut second);
        mock.channel_push_event(id, first);
        mock.channel_push_event(id, second);

        let delivered = mock.drain(id);
        assert_eq!(delivered, vec![first, second]);
        assert_eq!(mock.queued(id), Some(0));
    }

    #[test]
    fn drain_fires_queued_trampolines() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        extern "C" fn bump(_data: *mut std::ffi::c_void) {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }

        let mock = MockServices::new();
        mock.initialize();
        let mut id = 0;
        mock.channel_create(&mut id);
        assert_eq!(mock.channel_exec(id, bump, 0), PS_SUCCESS);

        let before = FIRED.load(Ordering::SeqCst);
        mock.drain(id);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn set_active_requires_existing_channel() {
        let mock = MockServices::new();
        mock.initialize();
        assert_eq!(mock.channel_set_active(99), PS_FAILURE);
        assert_eq!(mock.last_error(), ERR_NO_SUCH_CHANNEL);

        let mut id = 0;
        mock.channel_create(&mut id);
        assert_eq!(mock.channel_set_active(id), PS_SUCCESS);
        assert_eq!(mock.channel_get_active(), id);
    }

    #[test]
    fn destroyed_events_stop_counting_as_live() {
        let mock = MockServices::new();
        mock.initialize();
        let mut raw = 0;
        mock.event_create(1, 2, &mut raw);
        assert_eq!(mock.live_events(), 1);
        assert_eq!(mock.event_destroy(raw), PS_SUCCESS);
        assert_eq!(mock.live_events(), 0);
        assert_eq!(mock.event_destroy(raw), PS_FAILURE);
        assert_eq!(mock.last_error(), ERR_NO_SUCH_EVENT);
    }

    #[test]
    fn creation_calls_require_initialization() {
        let mock = MockServices::new();

        let mut raw = 0;
        assert_eq!(mock.event_create(1, 2, &mut raw), PS_FAILURE);
        assert_eq!(mock.last_error(), ERR_NOT_INITIALIZED);

        assert_eq!(mock.register_domain(), PS_FAILURE);

        let mut id = 0;
        assert_eq!(mock.channel_create(&mut id), PS_FAILURE);
    }

    #[test]
    fn register_domain_hands_out_distinct_ids() {
        let mock = MockServices::new();
        mock.initialize();
        let a = mock.register_domain();
        let b = mock.register_domain();
        assert_ne!(a, b);
    }
}
