// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Closure bridging — lets native code that only understands plain function
// pointers invoke a Rust closure with captured state.
//
// Bridged closures are stored in a process-wide table keyed by a small
// nonzero token. The "data pointer" handed to the native registration call
// is the token widened to pointer size; the fixed trampolines decode it,
// atomically remove the table entry, and invoke the closure. Removal before
// invocation guarantees exactly-once execution: a second firing of the same
// token finds nothing and is reported as a failure instead of reading freed
// memory.
//
// Panics must never unwind across the native ABI — there is no way to
// represent a Rust panic in a C return code other than -1.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::{error, warn};

use funkwerk_core::types::ClosureToken;

/// Fire-and-forget trampoline shape expected by `ps_channel_exec`.
pub type UnitTrampoline = extern "C" fn(*mut c_void);

/// Status-returning trampoline shape expected by the handler registration
/// calls, where the native side inspects the return code.
pub type StatusTrampoline = extern "C" fn(*mut c_void) -> i32;

enum Entry {
    Unit(Box<dyn FnOnce() + Send>),
    Status(Box<dyn FnOnce() -> i32 + Send>),
}

fn registry() -> &'static Mutex<HashMap<u32, Entry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u32, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Token numbering starts at 1; zero is the "not a token" sentinel.
static NEXT_TOKEN: AtomicU32 = AtomicU32::new(1);

fn next_token() -> ClosureToken {
    let mut value = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    if value == 0 {
        // u32 wrap-around after ~4 billion registrations.
        value = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    }
    ClosureToken(value)
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashMap<u32, Entry>> {
    // A poisoned registry only means some closure panicked while the lock
    // was held elsewhere; the table itself is still coherent.
    registry().lock().unwrap_or_else(|e| e.into_inner())
}

/// Store a fire-and-forget closure and return its token.
pub(crate) fn register_unit(f: impl FnOnce() + Send + 'static) -> ClosureToken {
    let token = next_token();
    lock_registry().insert(token.0, Entry::Unit(Box::new(f)));
    token
}

/// Store a status-returning closure and return its token.
pub(crate) fn register_status(f: impl FnOnce() -> i32 + Send + 'static) -> ClosureToken {
    let token = next_token();
    lock_registry().insert(token.0, Entry::Status(Box::new(f)));
    token
}

/// Reclaim an entry whose native registration failed. Returns whether the
/// entry was still present.
pub(crate) fn unregister(token: ClosureToken) -> bool {
    lock_registry().remove(&token.0).is_some()
}

/// Drop every token whose entry the trampolines have already consumed.
/// One registry lock acquisition regardless of set size.
pub(crate) fn retain_live(tokens: &mut HashSet<ClosureToken>) {
    let registry = lock_registry();
    tokens.retain(|token| registry.contains_key(&token.0));
}

/// Number of bridged closures currently awaiting invocation. Used by tests
/// to verify that registration failures and trampoline firings leave no
/// entries behind.
pub fn outstanding() -> usize {
    lock_registry().len()
}

fn take_entry(data: *mut c_void) -> Option<Entry> {
    let token = ClosureToken::from_data(data as usize)?;
    lock_registry().remove(&token.0)
}

/// The fixed native-invokable entry point for fire-and-forget closures.
///
/// Invoked by the native library when a channel it services reaches a
/// queued `channel_exec` item. The entry is removed before the closure
/// runs, so re-invocation of a consumed token is a no-op plus a warning
/// rather than undefined behavior.
pub extern "C" fn unit_trampoline(data: *mut c_void) {
    match take_entry(data) {
        Some(Entry::Unit(f)) => {
            if catch_unwind(AssertUnwindSafe(f)).is_err() {
                error!("bridged closure panicked; panic contained at the native boundary");
            }
        }
        Some(Entry::Status(f)) => {
            // Registered through the wrong shape; run it anyway and drop
            // the status the native side never asked for.
            warn!("status closure fired through the unit trampoline");
            if catch_unwind(AssertUnwindSafe(f)).is_err() {
                error!("bridged closure panicked; panic contained at the native boundary");
            }
        }
        None => warn!(
            data = data as usize,
            "unit trampoline fired for an unknown or already-consumed token"
        ),
    }
}

/// The fixed native-invokable entry point for status-returning closures.
///
/// Returns the closure's own status, or -1 when the closure panicked or
/// the token was unknown/already consumed.
pub extern "C" fn status_trampoline(data: *mut c_void) -> i32 {
    match take_entry(data) {
        Some(Entry::Status(f)) => match catch_unwind(AssertUnwindSafe(f)) {
            Ok(status) => status,
            Err(_) => {
                error!("bridged closure panicked; panic contained at the native boundary");
                -1
            }
        },
        Some(Entry::Unit(f)) => {
            warn!("unit closure fired through the status trampoline");
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => 0,
                Err(_) => -1,
            }
        }
        None => {
            warn!(
                data = data as usize,
                "status trampoline fired for an unknown or already-consumed token"
            );
            -1
        }
    }
}

// ---------------------------------------------------------------------------
// Record codec
// ---------------------------------------------------------------------------
// The invocation/data-transport collaborator attaches arbitrary payload bytes
// to an invocation object using the same encode/free primitives, without the
// trampoline. The record is a u32 little-endian length prefix followed by the
// payload, handed across the boundary as a raw allocation that must be freed
// exactly once.

/// Largest payload whose length fits the u32 prefix.
pub const RECORD_MAX_LEN: usize = u32::MAX as usize;

/// Live record allocations, for leak verification.
static LIVE_RECORDS: AtomicUsize = AtomicUsize::new(0);

/// Number of encoded records that have not been freed yet.
pub fn live_records() -> usize {
    LIVE_RECORDS.load(Ordering::SeqCst)
}

fn encode_record_with_cap(payload: &[u8], cap: usize) -> Option<*mut u8> {
    if payload.len() > cap {
        warn!(
            len = payload.len(),
            cap, "record payload exceeds the length-prefix cap; rejected"
        );
        return None;
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let ptr = Box::into_raw(buf.into_boxed_slice()) as *mut u8;
    LIVE_RECORDS.fetch_add(1, Ordering::SeqCst);
    Some(ptr)
}

/// Encode `payload` into a length-prefixed native record.
///
/// Returns `None` — a soft failure, never an error — when the payload would
/// not fit the 32-bit length prefix. Oversize payloads are rejected whole,
/// never truncated.
pub fn encode_record(payload: &[u8]) -> Option<*mut u8> {
    encode_record_with_cap(payload, RECORD_MAX_LEN)
}

/// Read the payload back out of an encoded record.
///
/// # Safety
///
/// `ptr` must be a live pointer produced by [`encode_record`] that has not
/// been passed to [`free_record`].
pub unsafe fn record_payload<'a>(ptr: *const u8) -> &'a [u8] {
    let len = u32::from_le_bytes(unsafe { *(ptr as *const [u8; 4]) }) as usize;
    unsafe { std::slice::from_raw_parts(ptr.add(4), len) }
}

/// Free an encoded record.
///
/// # Safety
///
/// `ptr` must come from [`encode_record`] and must not be freed twice; the
/// length prefix is trusted to reconstruct the original allocation.
pub unsafe fn free_record(ptr: *mut u8) {
    let len = u32::from_le_bytes(unsafe { *(ptr as *const [u8; 4]) }) as usize;
    let total = 4 + len;
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, total)) });
    LIVE_RECORDS.fetch_sub(1, Ordering::SeqCst);
}
