// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Funkwerk — event channels and closure bridging for the native
// platform-services library.
//
// Domain collaborators (battery, dialogs, vibration, ...) are built on four
// pieces: a shared refcounted `Connection`, thread-affine `Channel` queues,
// opaque owned/borrowed `Event` records, and the closure bridge that lets
// native code invoke a Rust closure through a fixed function-pointer
// trampoline. Everything native-facing goes through the `NativeServices`
// seam, backed either by the dynamically-loaded library or by the
// in-process mock.

pub mod channel;
pub mod closure;
pub mod connection;
pub mod event;
pub mod handle;
pub mod native;

pub use channel::Channel;
pub use connection::{Connection, FatalReason, ServiceContext};
pub use event::{Event, Ownership};
pub use native::loader::NativeLibrary;
pub use native::mock::MockServices;
pub use native::{NativeServices, RawEvent};

use std::sync::Arc;

use funkwerk_core::config::BridgeConfig;
use funkwerk_core::error::Result;

/// Build a context over the real platform-services library resolved from
/// `config`.
///
/// # Safety
///
/// Loading the shared library runs its initialization code in-process; the
/// caller must trust the configured library.
pub unsafe fn load_platform_services(config: &BridgeConfig) -> Result<Arc<ServiceContext>> {
    let backend = unsafe { NativeLibrary::load(config)? };
    Ok(ServiceContext::new(Arc::new(backend), config))
}

/// Build a context over the in-process mock backend, for hosts and tests
/// that run without the native library.
pub fn mock_platform_services(config: &BridgeConfig) -> (Arc<MockServices>, Arc<ServiceContext>) {
    let backend = Arc::new(MockServices::new());
    let ctx = ServiceContext::new(Arc::clone(&backend) as Arc<dyn NativeServices>, config);
    (backend, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkwerk_core::types::{DomainId, EventCode};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// The end-to-end shape every domain collaborator relies on: obtain the
    /// shared connection, create a channel, reserve a domain, push an event
    /// and a closure, and observe both when the native side services the
    /// queue.
    #[test]
    fn collaborator_round_trip() {
        init_tracing();
        let (mock, ctx) = mock_platform_services(&BridgeConfig::default());
        let mut conn = ctx.obtain().expect("obtain");

        let domain = conn.register_domain().expect("reserve domain");
        let channel = Channel::create(&conn).expect("channel");
        channel.make_active().expect("make_active");

        let event = Event::create(&conn, domain, EventCode(2)).expect("event");
        assert!(channel.push_event(&event).expect("push_event"));

        let counter = Arc::new(AtomicI32::new(0));
        let seen = Arc::clone(&counter);
        assert!(channel.push_closure(move || {
            seen.fetch_add(5, Ordering::SeqCst);
        }).expect("push_closure"));

        let delivered = mock.drain(channel.id().0);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(delivered.len(), 1);

        // Dispatch convention: compare domain and code against the ones the
        // collaborator reserved.
        let incoming = Event::borrowed(&conn, delivered[0]);
        assert_eq!(incoming.domain().expect("domain"), domain);
        assert_eq!(incoming.code().expect("code"), EventCode(2));

        conn.release().expect("release");
        assert_eq!(mock.shutdown_count(), 1);
    }

    #[test]
    fn channels_are_independent_per_thread() {
        let (mock, ctx) = mock_platform_services(&BridgeConfig::default());
        let conn = ctx.obtain().expect("obtain");

        let local = Channel::create(&conn).expect("local channel");
        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let remote = Channel::create(&conn).expect("remote channel");
                    // The spawned thread owns its channel and may activate it.
                    remote.make_active().expect("remote make_active");
                    assert_ne!(remote.id(), local.id());
                })
                .join()
                .expect("join");
        });

        // The local thread may not activate from here on behalf of the
        // other thread's channel, but its own still works.
        local.make_active().expect("local make_active");
        assert_eq!(mock.live_events(), 0);
    }

    #[test]
    fn no_cross_channel_ordering_only_fifo_within_one() {
        let (mock, ctx) = mock_platform_services(&BridgeConfig::default());
        let conn = ctx.obtain().expect("obtain");
        let a = Channel::create(&conn).expect("channel a");
        let b = Channel::create(&conn).expect("channel b");

        let domain = DomainId(1);
        // Keep the owned payload events alive until after delivery; the
        // queue holds raw references, not ownership.
        let mut pending = Vec::new();
        for code in [1u32, 2, 3] {
            let event = Event::create(&conn, domain, EventCode(code)).expect("event");
            a.push_event(&event).expect("push a");
            pending.push(event);
            let event = Event::create(&conn, domain, EventCode(code + 100)).expect("event");
            b.push_event(&event).expect("push b");
            pending.push(event);
        }

        let codes = |raws: Vec<RawEvent>| -> Vec<u32> {
            raws.into_iter()
                .map(|raw| Event::borrowed(&conn, raw).code().expect("code").0)
                .collect()
        };
        assert_eq!(codes(mock.drain(a.id().0)), vec![1, 2, 3]);
        assert_eq!(codes(mock.drain(b.id().0)), vec![101, 102, 103]);
    }
}
