// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Funkwerk.
//
// Two tiers: native-call errors carry the platform error code queried from
// the library after a -1 return; lifecycle errors (Disposed, InvalidOperation)
// are raised locally and never touch the native side.

use thiserror::Error;

/// Top-level error type for all Funkwerk operations.
#[derive(Debug, Error)]
pub enum FunkwerkError {
    // -- Native-call tier --
    /// A native call returned -1; `code` is the platform's last-error value.
    #[error("native platform-services call failed (platform error {code})")]
    Native { code: i32 },

    #[error("failed to load the platform-services library: {0}")]
    LibraryLoad(String),

    #[error("symbol '{symbol}' not found in the platform-services library")]
    SymbolMissing { symbol: String },

    // -- Lifecycle tier --
    /// Operation on a handle that was already released.
    #[error("{0} has already been disposed")]
    Disposed(&'static str),

    /// Cross-thread affinity violation, disposing a borrowed event, or
    /// any other misuse that is detectable before calling native code.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FunkwerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_carries_platform_code() {
        let err = FunkwerkError::Native { code: 22 };
        assert_eq!(err.to_string(), "native platform-services call failed (platform error 22)");
    }

    #[test]
    fn disposed_names_the_handle_kind() {
        let err = FunkwerkError::Disposed("channel");
        assert!(err.to_string().contains("channel"));
    }
}
