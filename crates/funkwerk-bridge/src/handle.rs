// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Release-at-most-once discipline for native allocations.
//
// Every native handle in this crate is reachable through some generic "free"
// primitive on the platform-services side. `ReleaseOnce` guards the raw value
// so that free runs at most once: `take()` yields the value to exactly one
// caller, after which the slot holds the zero sentinel.

use std::cell::Cell;

/// Pointer-sized native handle slot. Zero means "already released" — the
/// native library never hands out a zero handle.
#[derive(Debug)]
pub struct ReleaseOnce {
    raw: Cell<usize>,
}

impl ReleaseOnce {
    pub fn new(raw: usize) -> Self {
        Self { raw: Cell::new(raw) }
    }

    /// The raw value, or zero if it was already taken.
    pub fn peek(&self) -> usize {
        self.raw.get()
    }

    /// Whether the handle is still live.
    pub fn is_live(&self) -> bool {
        self.raw.get() != 0
    }

    /// Take the raw value for release. Returns `None` on every call after
    /// the first, which is what makes double-free unrepresentable.
    pub fn take(&self) -> Option<usize> {
        match self.raw.replace(0) {
            0 => None,
            raw => Some(raw),
        }
    }
}
