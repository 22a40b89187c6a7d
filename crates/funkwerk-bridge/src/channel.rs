// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Thread-affine native event queues.
//
// A channel records the thread that created it. Enqueue operations are safe
// from any thread, but retargeting default event delivery (the process-wide
// active-channel slot) is restricted to the owning thread and rejected
// everywhere else before any native call is made.

use std::thread::{self, ThreadId};

use std::sync::Arc;

use tracing::{debug, warn};

use funkwerk_core::error::{FunkwerkError, Result};
use funkwerk_core::types::{ChannelId, PS_SUCCESS};

use crate::closure;
use crate::connection::{Connection, ServiceContext};
use crate::event::Event;

/// Handle to a native event queue.
///
/// `Created → {Active, Inactive} → Disposed`; active/inactive is a property
/// of the process-wide slot, not of this instance.
pub struct Channel {
    ctx: Arc<ServiceContext>,
    id: ChannelId,
    owner: ThreadId,
    /// False for the lightweight wrapper returned by `active_channel`,
    /// which must not destroy the underlying queue.
    owned: bool,
    disposed: bool,
}

impl Channel {
    /// Create a new native event queue owned by the calling thread.
    pub fn create(conn: &Connection) -> Result<Self> {
        conn.ensure_live()?;
        let ctx = Arc::clone(conn.ctx());
        let mut raw_id = 0;
        if ctx.backend().channel_create(&mut raw_id) != PS_SUCCESS {
            return Err(ctx.native_error());
        }
        let id = ChannelId(raw_id);
        debug!(channel = %id, "channel created");
        Ok(Self {
            ctx,
            id,
            owner: thread::current().id(),
            owned: true,
            disposed: false,
        })
    }

    /// Non-owning wrapper over whatever queue the native library currently
    /// targets. Affinity is bound to the wrapping thread.
    pub(crate) fn wrap_active(ctx: Arc<ServiceContext>, id: ChannelId) -> Self {
        Self {
            ctx,
            id,
            owner: thread::current().id(),
            owned: false,
            disposed: false,
        }
    }

    /// The queue currently receiving default event delivery. Forwards to
    /// [`Connection::active_channel`].
    pub fn active(conn: &Connection) -> Result<Self> {
        conn.active_channel()
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(FunkwerkError::Disposed("channel"));
        }
        Ok(())
    }

    /// Enqueue an event. The native library takes no ownership interest
    /// beyond the call, so both owned and borrowed events may be pushed.
    ///
    /// Returns `Ok(false)` when the native side refuses the enqueue; errors
    /// are reserved for lifecycle violations.
    pub fn push_event(&self, event: &Event) -> Result<bool> {
        self.ensure_live()?;
        let raw = event.as_raw()?;
        Ok(self.ctx.backend().channel_push_event(self.id.0, raw) == PS_SUCCESS)
    }

    /// Bridge a closure onto this queue; the native library invokes it
    /// through the fixed fire-and-forget trampoline once the queue is
    /// serviced.
    ///
    /// Returns `Ok(false)` — with the registry entry reclaimed, so nothing
    /// leaks — when the native call refuses the registration.
    pub fn push_closure(&self, f: impl FnOnce() + Send + 'static) -> Result<bool> {
        self.ensure_live()?;
        let token = self.ctx.bridge_unit(f);
        let rc = self
            .ctx
            .backend()
            .channel_exec(self.id.0, closure::unit_trampoline, token.as_data());
        if rc != PS_SUCCESS {
            closure::unregister(token);
            warn!(channel = %self.id, code = self.ctx.backend().last_error(), "channel_exec refused; closure reclaimed");
            return Ok(false);
        }
        Ok(true)
    }

    /// Make this queue the process-wide default delivery target.
    ///
    /// Only the thread that created the channel may do this; other threads
    /// get `InvalidOperation` without any native call.
    pub fn make_active(&self) -> Result<()> {
        self.ensure_live()?;
        if thread::current().id() != self.owner {
            return Err(FunkwerkError::InvalidOperation(format!(
                "channel {} belongs to another thread; only its owner may activate it",
                self.id
            )));
        }
        if self.ctx.backend().channel_set_active(self.id.0) != PS_SUCCESS {
            return Err(self.ctx.native_error());
        }
        debug!(channel = %self.id, "channel activated");
        Ok(())
    }

    /// Destroy the native queue. All further use fails with `Disposed`.
    pub fn dispose(&mut self) -> Result<()> {
        if !self.owned {
            return Err(FunkwerkError::InvalidOperation(
                "an active-channel wrapper does not own its queue and cannot dispose it".into(),
            ));
        }
        self.ensure_live()?;
        if self.ctx.backend().channel_destroy(self.id.0) != PS_SUCCESS {
            return Err(self.ctx.native_error());
        }
        self.disposed = true;
        debug!(channel = %self.id, "channel disposed");
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Queues are destroyed explicitly or by connection teardown; a
        // silent native call from Drop could race connection shutdown.
        if self.owned && !self.disposed {
            warn!(channel = %self.id, "channel dropped without dispose; queue lives until connection teardown");
        }
    }
}
