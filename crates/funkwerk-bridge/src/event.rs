// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Opaque domain/code tagged native event records.
//
// An event is either owned (constructed by a collaborator as a payload to
// send; the holder must release it exactly once) or borrowed (produced by
// the native library for the duration of one delivery; releasing it is
// forbidden because the producer controls its lifetime).

use std::sync::Arc;

use tracing::debug;

use funkwerk_core::error::{FunkwerkError, Result};
use funkwerk_core::types::{DomainId, EventCode, PS_SUCCESS};

use crate::connection::{Connection, ServiceContext};
use crate::handle::ReleaseOnce;
use crate::native::RawEvent;

/// Who controls the event's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Holder must release exactly once (or let Drop do it).
    Owned,
    /// Lifetime belongs to the native callback that produced it.
    Borrowed,
}

/// Opaque native event record.
pub struct Event {
    raw: ReleaseOnce,
    ownership: Ownership,
    ctx: Arc<ServiceContext>,
}

impl Event {
    /// Construct an owned payload event through the native library.
    pub fn create(conn: &Connection, domain: DomainId, code: EventCode) -> Result<Self> {
        conn.ensure_live()?;
        let ctx = Arc::clone(conn.ctx());
        let mut raw: RawEvent = 0;
        if ctx.backend().event_create(domain.0, code.0, &mut raw) != PS_SUCCESS {
            return Err(ctx.native_error());
        }
        Ok(Self {
            raw: ReleaseOnce::new(raw),
            ownership: Ownership::Owned,
            ctx,
        })
    }

    /// Wrap a raw event reference delivered by the native library.
    ///
    /// The wrapper is valid for the duration of the delivery only; dispose
    /// attempts are rejected because the native side owns the record.
    pub fn borrowed(conn: &Connection, raw: RawEvent) -> Self {
        Self {
            raw: ReleaseOnce::new(raw),
            ownership: Ownership::Borrowed,
            ctx: Arc::clone(conn.ctx()),
        }
    }

    fn live_raw(&self) -> Result<RawEvent> {
        match self.raw.peek() {
            0 => Err(FunkwerkError::Disposed("event")),
            raw => Ok(raw),
        }
    }

    /// Domain tag of this event.
    pub fn domain(&self) -> Result<DomainId> {
        let raw = self.live_raw()?;
        Ok(DomainId(self.ctx.backend().event_domain(raw)))
    }

    /// Code tag of this event.
    pub fn code(&self) -> Result<EventCode> {
        let raw = self.live_raw()?;
        Ok(EventCode(self.ctx.backend().event_code(raw)))
    }

    /// The raw reference, for passing into further native calls.
    pub fn as_raw(&self) -> Result<RawEvent> {
        self.live_raw()
    }

    /// Whether this event may be released by the holder.
    pub fn is_disposable(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// Release an owned event.
    ///
    /// Borrowed events fail with `InvalidOperation`; a second dispose of an
    /// owned event fails with `Disposed`.
    pub fn dispose(&mut self) -> Result<()> {
        if self.ownership == Ownership::Borrowed {
            return Err(FunkwerkError::InvalidOperation(
                "borrowed event cannot be disposed directly".into(),
            ));
        }
        let raw = self.raw.take().ok_or(FunkwerkError::Disposed("event"))?;
        if self.ctx.backend().event_destroy(raw) != PS_SUCCESS {
            return Err(self.ctx.native_error());
        }
        Ok(())
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        // RAII backstop for owned events; explicit dispose is the API.
        if self.ownership == Ownership::Owned {
            if let Some(raw) = self.raw.take() {
                debug!(raw, "owned event released by drop");
                self.ctx.backend().event_destroy(raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeServices;
    use crate::native::mock::MockServices;
    use funkwerk_core::config::BridgeConfig;

    fn setup() -> (Arc<MockServices>, Connection) {
        let mock = Arc::new(MockServices::new());
        let ctx = ServiceContext::new(mock.clone(), &BridgeConfig::default());
        let conn = ctx.obtain().expect("obtain");
        (mock, conn)
    }

    #[test]
    fn owned_event_exposes_domain_and_code() {
        let (_mock, conn) = setup();
        let event = Event::create(&conn, DomainId(7), EventCode(42)).expect("create");
        assert_eq!(event.domain().expect("domain"), DomainId(7));
        assert_eq!(event.code().expect("code"), EventCode(42));
        assert!(event.is_disposable());
    }

    #[test]
    fn owned_event_disposes_once_then_fails_disposed() {
        let (mock, conn) = setup();
        let mut event = Event::create(&conn, DomainId(1), EventCode(2)).expect("create");
        assert_eq!(mock.live_events(), 1);

        event.dispose().expect("first dispose");
        assert_eq!(mock.live_events(), 0);

        let err = event.dispose().expect_err("second dispose must fail");
        assert!(matches!(err, FunkwerkError::Disposed("event")));
    }

    #[test]
    fn borrowed_event_rejects_dispose() {
        let (mock, conn) = setup();
        let mut raw = 0;
        mock.event_create(3, 9, &mut raw);

        let mut event = Event::borrowed(&conn, raw);
        assert!(!event.is_disposable());
        let err = event.dispose().expect_err("borrowed dispose must fail");
        assert!(matches!(err, FunkwerkError::InvalidOperation(_)));

        // The record is still alive — the producer owns it.
        assert_eq!(mock.live_events(), 1);
        assert_eq!(event.domain().expect("domain"), DomainId(3));
    }

    #[test]
    fn accessors_fail_after_dispose() {
        let (_mock, conn) = setup();
        let mut event = Event::create(&conn, DomainId(1), EventCode(2)).expect("create");
        event.dispose().expect("dispose");

        assert!(matches!(event.domain(), Err(FunkwerkError::Disposed("event"))));
        assert!(matches!(event.code(), Err(FunkwerkError::Disposed("event"))));
        assert!(matches!(event.as_raw(), Err(FunkwerkError::Disposed("event"))));
    }

    #[test]
    fn drop_releases_owned_event() {
        let (mock, conn) = setup();
        {
            let _event = Event::create(&conn, DomainId(1), EventCode(2)).expect("create");
            assert_eq!(mock.live_events(), 1);
        }
        assert_eq!(mock.live_events(), 0);
    }

    #[test]
    fn drop_leaves_borrowed_event_alone() {
        let (mock, conn) = setup();
        let mut raw = 0;
        mock.event_create(3, 9, &mut raw);
        {
            let _event = Event::borrowed(&conn, raw);
        }
        assert_eq!(mock.live_events(), 1);
    }
}
