// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dynamic loading of the platform-services library.
//
// Resolves the shared library with platform naming conventions (lib prefix,
// so/dylib/dll suffix) across the configured search paths, then resolves
// every `ps_*` symbol exactly once at load time. A missing symbol is a load
// error, not a latent panic at first call.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::{debug, info};

use funkwerk_core::config::BridgeConfig;
use funkwerk_core::error::{FunkwerkError, Result};

use super::{NativeServices, RawEvent};
use crate::closure::{StatusTrampoline, UnitTrampoline};

type InitFn = unsafe extern "C" fn() -> i32;
type ShutdownFn = unsafe extern "C" fn() -> i32;
type LastErrorFn = unsafe extern "C" fn() -> i32;
type ChannelCreateFn = unsafe extern "C" fn(*mut i32) -> i32;
type ChannelDestroyFn = unsafe extern "C" fn(i32) -> i32;
type ChannelGetActiveFn = unsafe extern "C" fn() -> i32;
type ChannelSetActiveFn = unsafe extern "C" fn(i32) -> i32;
type ChannelPushEventFn = unsafe extern "C" fn(i32, *mut c_void) -> i32;
type ChannelExecFn = unsafe extern "C" fn(i32, UnitTrampoline, *mut c_void) -> i32;
type RegisterHandlerFn = unsafe extern "C" fn(StatusTrampoline, *mut c_void) -> i32;
type EventCreateFn = unsafe extern "C" fn(i32, u32, *mut *mut c_void) -> i32;
type EventDestroyFn = unsafe extern "C" fn(*mut c_void) -> i32;
type EventDomainFn = unsafe extern "C" fn(*mut c_void) -> i32;
type EventCodeFn = unsafe extern "C" fn(*mut c_void) -> u32;
type RegisterDomainFn = unsafe extern "C" fn() -> i32;

/// Platform-specific default library search paths.
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        if cfg!(target_pointer_width = "64") {
            paths.push(PathBuf::from("/usr/lib64"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(system_root) = std::env::var("SystemRoot") {
            paths.push(PathBuf::from(format!("{system_root}\\System32")));
        }
    }

    paths
}

/// Resolve a library base name to a full path using platform naming
/// conventions, searching `extra_paths` before the platform defaults.
fn resolve_library_path(name: &str, extra_paths: &[PathBuf]) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.is_absolute() && direct.exists() {
        return Some(direct.to_path_buf());
    }

    let extensions: &[&str] = if cfg!(target_os = "windows") {
        &["dll"]
    } else if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else {
        &["so"]
    };
    let prefixes: &[&str] = if cfg!(target_os = "windows") {
        &["", "lib"]
    } else {
        &["lib", ""]
    };

    let mut search: Vec<PathBuf> = extra_paths.to_vec();
    search.extend(default_search_paths());

    for dir in &search {
        for prefix in prefixes {
            for ext in extensions {
                let candidate = dir.join(format!("{prefix}{name}.{ext}"));
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Copy one typed symbol out of the library.
///
/// # Safety
///
/// The caller asserts that `name` has the signature `T` in the loaded
/// library; a mismatch is undefined behavior at call time.
unsafe fn sym<T: Copy>(lib: &Library, name: &str) -> Result<T> {
    let symbol: Symbol<'_, T> = unsafe {
        lib.get(name.as_bytes()).map_err(|_| FunkwerkError::SymbolMissing {
            symbol: name.to_string(),
        })?
    };
    Ok(*symbol)
}

/// The real platform-services library, loaded at runtime.
///
/// Holds the `Library` alive for as long as any resolved function pointer
/// can be called.
pub struct NativeLibrary {
    _lib: Library,
    initialize: InitFn,
    shutdown: ShutdownFn,
    last_error: LastErrorFn,
    channel_create: ChannelCreateFn,
    channel_destroy: ChannelDestroyFn,
    channel_get_active: ChannelGetActiveFn,
    channel_set_active: ChannelSetActiveFn,
    channel_push_event: ChannelPushEventFn,
    channel_exec: ChannelExecFn,
    register_shutdown_handler: RegisterHandlerFn,
    register_channel_destroy_handler: RegisterHandlerFn,
    event_create: EventCreateFn,
    event_destroy: EventDestroyFn,
    event_domain: EventDomainFn,
    event_code: EventCodeFn,
    register_domain: RegisterDomainFn,
}

impl NativeLibrary {
    /// Load the platform-services library named by `config` and resolve
    /// the full `ps_*` symbol table.
    ///
    /// # Safety
    ///
    /// Loading a shared library runs its initialization code in-process;
    /// the caller must trust the resolved library.
    pub unsafe fn load(config: &BridgeConfig) -> Result<Self> {
        let path = resolve_library_path(&config.library_name, &config.library_search_paths)
            .ok_or_else(|| {
                FunkwerkError::LibraryLoad(format!(
                    "library '{}' not found in search paths",
                    config.library_name
                ))
            })?;
        debug!(path = %path.display(), "loading platform-services library");

        let lib = unsafe {
            Library::new(&path).map_err(|e| FunkwerkError::LibraryLoad(e.to_string()))?
        };

        let loaded = unsafe {
            Self {
                initialize: sym(&lib, "ps_initialize")?,
                shutdown: sym(&lib, "ps_shutdown")?,
                last_error: sym(&lib, "ps_last_error")?,
                channel_create: sym(&lib, "ps_channel_create")?,
                channel_destroy: sym(&lib, "ps_channel_destroy")?,
                channel_get_active: sym(&lib, "ps_channel_get_active")?,
                channel_set_active: sym(&lib, "ps_channel_set_active")?,
                channel_push_event: sym(&lib, "ps_channel_push_event")?,
                channel_exec: sym(&lib, "ps_channel_exec")?,
                register_shutdown_handler: sym(&lib, "ps_register_shutdown_handler")?,
                register_channel_destroy_handler: sym(&lib, "ps_register_channel_destroy_handler")?,
                event_create: sym(&lib, "ps_event_create")?,
                event_destroy: sym(&lib, "ps_event_destroy")?,
                event_domain: sym(&lib, "ps_event_domain")?,
                event_code: sym(&lib, "ps_event_code")?,
                register_domain: sym(&lib, "ps_register_domain")?,
                _lib: lib,
            }
        };
        info!(path = %path.display(), "platform-services library loaded");
        Ok(loaded)
    }
}

impl NativeServices for NativeLibrary {
    fn initialize(&self) -> i32 {
        unsafe { (self.initialize)() }
    }

    fn shutdown(&self) -> i32 {
        unsafe { (self.shutdown)() }
    }

    fn last_error(&self) -> i32 {
        unsafe { (self.last_error)() }
    }

    fn channel_create(&self, out_id: &mut i32) -> i32 {
        unsafe { (self.channel_create)(out_id as *mut i32) }
    }

    fn channel_destroy(&self, id: i32) -> i32 {
        unsafe { (self.channel_destroy)(id) }
    }

    fn channel_get_active(&self) -> i32 {
        unsafe { (self.channel_get_active)() }
    }

    fn channel_set_active(&self, id: i32) -> i32 {
        unsafe { (self.channel_set_active)(id) }
    }

    fn channel_push_event(&self, id: i32, event: RawEvent) -> i32 {
        unsafe { (self.channel_push_event)(id, event as *mut c_void) }
    }

    fn channel_exec(&self, id: i32, trampoline: UnitTrampoline, data: usize) -> i32 {
        unsafe { (self.channel_exec)(id, trampoline, data as *mut c_void) }
    }

    fn register_shutdown_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32 {
        unsafe { (self.register_shutdown_handler)(trampoline, data as *mut c_void) }
    }

    fn register_channel_destroy_handler(&self, trampoline: StatusTrampoline, data: usize) -> i32 {
        unsafe { (self.register_channel_destroy_handler)(trampoline, data as *mut c_void) }
    }

    fn event_create(&self, domain: i32, code: u32, out: &mut RawEvent) -> i32 {
        let mut raw: *mut c_void = std::ptr::null_mut();
        let rc = unsafe { (self.event_create)(domain, code, &mut raw) };
        *out = raw as usize;
        rc
    }

    fn event_destroy(&self, event: RawEvent) -> i32 {
        unsafe { (self.event_destroy)(event as *mut c_void) }
    }

    fn event_domain(&self, event: RawEvent) -> i32 {
        unsafe { (self.event_domain)(event as *mut c_void) }
    }

    fn event_code(&self, event: RawEvent) -> u32 {
        unsafe { (self.event_code)(event as *mut c_void) }
    }

    fn register_domain(&self) -> i32 {
        unsafe { (self.register_domain)() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_search_paths_not_empty() {
        assert!(!default_search_paths().is_empty());
    }

    #[test]
    fn missing_library_is_not_resolved() {
        assert!(resolve_library_path("no_such_platform_services_xyz", &[]).is_none());
    }

    #[test]
    fn extra_paths_are_searched_first() {
        // A nonexistent extra path must not break resolution.
        let extra = vec![PathBuf::from("/definitely/not/here")];
        assert!(resolve_library_path("no_such_platform_services_xyz", &extra).is_none());
    }

    #[test]
    fn load_reports_missing_library() {
        let mut config = BridgeConfig::default();
        config.library_name = "no_such_platform_services_xyz".into();
        let err = unsafe { NativeLibrary::load(&config) }.err().expect("must fail");
        assert!(matches!(err, FunkwerkError::LibraryLoad(_)));
    }
}
