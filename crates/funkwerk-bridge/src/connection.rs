// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared connection to the platform-services library.
//
// The native link is process-wide: many logical `Connection` handles share
// one underlying link through a reference count held by an explicit
// `ServiceContext`. Counter transitions and native initialization happen
// inside one mutex-guarded critical section; the final-release shutdown
// runs after the guard is dropped, because shutdown synchronously fires
// registered handlers that may re-enter the context. A tearing-down flag
// keeps `obtain` out of that window, so concurrent obtain/release from any
// thread stays defined behavior, unlike in the unsynchronized design this
// replaces.
//
// Releasing the context more times than it was obtained is the one fatal
// condition. It is an explicit, named path: the registered fatal hook runs
// first (the host may flush logs or escalate), then the process aborts.
// Continuing with a corrupted count would be worse than dying.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use funkwerk_core::config::BridgeConfig;
use funkwerk_core::error::{FunkwerkError, Result};
use funkwerk_core::types::{ChannelId, ClosureToken, DomainId, PS_SUCCESS};

use crate::channel::Channel;
use crate::closure;
use crate::native::NativeServices;

/// Reasons the bridge gives up on the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// The shared connection was released more times than it was obtained.
    ConnectionOverRelease,
}

type FatalHook = Box<dyn Fn(FatalReason) + Send + Sync>;

struct LinkState {
    count: u64,
    /// Set for the window between the final decrement and the end of
    /// native shutdown, during which `obtain` is refused.
    tearing_down: bool,
}

/// Process-wide bridge state: the backend, the shared-link reference count,
/// and the bridged-closure tokens this context has issued.
pub struct ServiceContext {
    backend: Arc<dyn NativeServices>,
    link: Mutex<LinkState>,
    tokens: Mutex<HashSet<ClosureToken>>,
    fatal_hook: Mutex<Option<FatalHook>>,
    abort_on_over_release: bool,
}

impl ServiceContext {
    pub fn new(backend: Arc<dyn NativeServices>, config: &BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            backend,
            link: Mutex::new(LinkState {
                count: 0,
                tearing_down: false,
            }),
            tokens: Mutex::new(HashSet::new()),
            fatal_hook: Mutex::new(None),
            abort_on_over_release: config.abort_on_over_release,
        })
    }

    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Obtain a logical handle to the shared native link.
    ///
    /// The first obtain (and the first after the count returns to zero)
    /// performs the actual native initialization and fails with a native
    /// error if that fails; later obtains only increment the count. While
    /// another thread's final release is still tearing the link down the
    /// obtain is refused with `InvalidOperation`; it succeeds again once
    /// teardown completes.
    pub fn obtain(self: &Arc<Self>) -> Result<Connection> {
        let mut link = self.lock_link();
        if link.tearing_down {
            return Err(FunkwerkError::InvalidOperation(
                "the shared link is tearing down; obtain again once teardown completes".into(),
            ));
        }
        if link.count == 0 {
            if self.backend.initialize() != PS_SUCCESS {
                return Err(self.native_error());
            }
            info!("platform-services link initialized");
        }
        link.count += 1;
        Ok(Connection {
            ctx: Arc::clone(self),
            released: false,
        })
    }

    /// Install the hook that runs before a fatal abort.
    pub fn set_fatal_hook(&self, hook: impl Fn(FatalReason) + Send + Sync + 'static) {
        *self.fatal_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Bridged closures issued by this context that are still awaiting
    /// invocation.
    pub fn outstanding_closures(&self) -> usize {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        closure::retain_live(&mut tokens);
        tokens.len()
    }

    #[cfg(test)]
    fn tracked_tokens(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn backend(&self) -> &dyn NativeServices {
        self.backend.as_ref()
    }

    /// Build the raised error for an unexpected -1 return.
    pub(crate) fn native_error(&self) -> FunkwerkError {
        FunkwerkError::Native {
            code: self.backend.last_error(),
        }
    }

    /// Register a fire-and-forget closure and remember its token for
    /// teardown accounting.
    pub(crate) fn bridge_unit(&self, f: impl FnOnce() + Send + 'static) -> ClosureToken {
        let token = closure::register_unit(f);
        self.track(token);
        token
    }

    /// Register a status-returning closure, tracked the same way.
    pub(crate) fn bridge_status(&self, f: impl FnOnce() -> i32 + Send + 'static) -> ClosureToken {
        let token = closure::register_status(f);
        self.track(token);
        token
    }

    /// Tokens of already-consumed closures are dead weight; sweep them out
    /// whenever the tracking set changes, so it never outgrows the number
    /// of closures actually pending.
    fn track(&self, token: ClosureToken) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(token);
        closure::retain_live(&mut tokens);
    }

    /// Decrement the shared count; tear the native link down on the last
    /// release. Called with the count at zero, this is the fatal path.
    fn release_link(&self) {
        {
            let mut link = self.lock_link();
            if link.count == 0 {
                drop(link);
                self.over_release();
                return;
            }
            link.count -= 1;
            if link.count > 0 {
                return;
            }
            link.tearing_down = true;
        }

        // Shutdown runs without the lock held: it synchronously fires the
        // registered shutdown handlers, which may re-enter this context.
        // The tearing-down flag keeps re-arm out of the window. Whatever
        // this context still has in the registry afterwards is dropped
        // uninvoked.
        if self.backend.shutdown() != PS_SUCCESS {
            warn!(code = self.backend.last_error(), "native shutdown reported failure");
        }
        let dropped = self.drain_tokens();
        if dropped > 0 {
            debug!(dropped, "dropped outstanding bridged closures at teardown");
        }
        info!("platform-services link torn down");

        self.lock_link().tearing_down = false;
    }

    fn drain_tokens(&self) -> usize {
        let tokens: Vec<ClosureToken> = self
            .tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        tokens.into_iter().filter(|&t| closure::unregister(t)).count()
    }

    fn over_release(&self) {
        error!("shared connection released more times than it was obtained");
        if let Some(hook) = self.fatal_hook.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            hook(FatalReason::ConnectionOverRelease);
        }
        if self.abort_on_over_release {
            std::process::abort();
        }
    }
}

/// Logical handle to the shared native link.
pub struct Connection {
    ctx: Arc<ServiceContext>,
    released: bool,
}

impl Connection {
    pub(crate) fn ctx(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(FunkwerkError::Disposed("connection"));
        }
        Ok(())
    }

    /// Release this handle. The N-th release (count 1 → 0) shuts the native
    /// link down exactly once; a second release of the same handle fails
    /// with `Disposed` without touching the count.
    pub fn release(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.released = true;
        self.ctx.release_link();
        Ok(())
    }

    /// Non-owning wrapper over the queue currently receiving default event
    /// delivery. Fails with `InvalidOperation` when nothing is active.
    pub fn active_channel(&self) -> Result<Channel> {
        self.ensure_live()?;
        let id = self.ctx.backend().channel_get_active();
        if id < 0 {
            return Err(FunkwerkError::InvalidOperation(
                "no channel is currently active".into(),
            ));
        }
        Ok(Channel::wrap_active(Arc::clone(&self.ctx), ChannelId(id)))
    }

    /// Retarget default event delivery. Enforces the channel's thread
    /// affinity, so only the owning thread succeeds.
    pub fn set_active_channel(&self, channel: &Channel) -> Result<()> {
        self.ensure_live()?;
        channel.make_active()
    }

    /// Reserve a fresh domain id for a sub-service collaborator.
    pub fn register_domain(&self) -> Result<DomainId> {
        self.ensure_live()?;
        let domain = self.ctx.backend().register_domain();
        if domain < 0 {
            return Err(self.ctx.native_error());
        }
        Ok(DomainId(domain))
    }

    /// Register a closure invoked at native shutdown.
    ///
    /// Every registration is fallible: `false` means the native call was
    /// refused and the bridged entry has been reclaimed — nothing leaks.
    pub fn register_shutdown_handler(&self, f: impl FnOnce() -> i32 + Send + 'static) -> bool {
        self.register_handler(f, /* shutdown = */ true)
    }

    /// Register a closure invoked whenever a channel is destroyed.
    pub fn register_channel_destroy_handler(
        &self,
        f: impl FnOnce() -> i32 + Send + 'static,
    ) -> bool {
        self.register_handler(f, /* shutdown = */ false)
    }

    fn register_handler(&self, f: impl FnOnce() -> i32 + Send + 'static, shutdown: bool) -> bool {
        if self.released {
            warn!("handler registration on a released connection");
            return false;
        }
        let token = self.ctx.bridge_status(f);
        let rc = if shutdown {
            self.ctx
                .backend()
                .register_shutdown_handler(closure::status_trampoline, token.as_data())
        } else {
            self.ctx
                .backend()
                .register_channel_destroy_handler(closure::status_trampoline, token.as_data())
        };
        if rc != PS_SUCCESS {
            closure::unregister(token);
            warn!(
                code = self.ctx.backend().last_error(),
                "native handler registration refused; closure reclaimed"
            );
            return false;
        }
        true
    }

    /// Bridged closures issued through this connection's context that are
    /// still awaiting invocation.
    pub fn outstanding_closures(&self) -> usize {
        self.ctx.outstanding_closures()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.released {
            debug!("connection released by drop");
            self.ctx.release_link();
        }
    }
}
