// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw native ABI surface of the platform-services library.
//
// Every call returns 0 on success and -1 on failure; after a failure the
// platform error code is available through `last_error`. The higher layers
// (connection, channel, event) convert that convention into either a raised
// `FunkwerkError::Native` or a boolean, per operation criticality.
//
// The trait seam exists so the same bridge code runs against the real
// dynamically-loaded library (`loader::NativeLibrary`) and the in-process
// fake (`mock::MockServices`) used by tests and native-less hosts.

pub mod loader;
pub mod mock;

use crate::closure::{StatusTrampoline, UnitTrampoline};

/// Opaque pointer-sized native event reference. Zero is the sentinel for
/// "no event" and is never produced by a successful call.
pub type RawEvent = usize;

/// Object-safe mirror of the `ps_*` C surface.
///
/// Implementations must be callable from any thread; thread-affinity rules
/// (who may retarget the active channel) are enforced above this seam, not
/// inside it.
pub trait NativeServices: Send + Sync {
    /// Bring up the native link. Called once per armed connection cycle.
    fn initialize(&self) -> i32;

    /// Tear down the native link.
    fn shutdown(&self) -> i32;

    /// Platform error code of the most recent failed call.
    fn last_error(&self) -> i32;

    /// Allocate a new event queue; writes its id on success.
    fn channel_create(&self, out_id: &mut i32) -> i32;

    /// Destroy an event queue.
    fn channel_destroy(&self, id: i32) -> i32;

    /// Id of the queue currently receiving default event delivery, or -1.
    fn channel_get_active(&self) -> i32;

    /// Retarget default event delivery to `id`.
    fn channel_set_active(&self, id: i32) -> i32;

    /// Enqueue an event; the native side takes no ownership interest
    /// beyond the call.
    fn channel_push_event(&self, id: i32, event: RawEvent) -> i32;

    /// Ask the native side to invoke `trampoline(data)` once the queue is
    /// serviced.
    fn channel_exec(&self, id: i32, trampoline: UnitTrampoline, data: usize) -> i32;

    /// Register `trampoline(data)` to run at native shutdown.
    fn register_shutdown_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32;

    /// Register `trampoline(data)` to run when any channel is destroyed.
    fn register_channel_destroy_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32;

    /// Construct an owned payload event; writes the raw reference on success.
    fn event_create(&self, domain: i32, code: u32, out: &mut RawEvent) -> i32;

    /// Release an event previously created through `event_create`.
    fn event_destroy(&self, event: RawEvent) -> i32;

    /// Domain tag of an event.
    fn event_domain(&self, event: RawEvent) -> i32;

    /// Code tag of an event.
    fn event_code(&self, event: RawEvent) -> u32;

    /// Reserve a fresh domain id for a sub-service collaborator.
    fn register_domain(&self) -> i32;
}
