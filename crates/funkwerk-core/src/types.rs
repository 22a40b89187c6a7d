// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Funkwerk platform-services bridge.

use serde::{Deserialize, Serialize};

/// Native status convention: every platform-services call returns one of
/// these two values. Anything else is a protocol violation.
pub const PS_SUCCESS: i32 = 0;
pub const PS_FAILURE: i32 = -1;

/// Integer namespace reserved per logical native sub-service.
///
/// Domain-specific collaborators (battery, dialogs, ...) reserve one id via
/// the native library and compare it against incoming events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainId(pub i32);

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Small per-domain event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventCode(pub u32);

impl std::fmt::Display for EventCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a native event queue.
///
/// Only valid while the owning `Channel` is not disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key into the bridged-closure registry.
///
/// Handed to the native library as its opaque `data` pointer; the fixed
/// trampolines decode it back into a registry lookup. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureToken(pub u32);

impl ClosureToken {
    /// Widen the token for transport as a native data pointer.
    pub fn as_data(self) -> usize {
        self.0 as usize
    }

    /// Recover a token from a native data pointer. Returns `None` for values
    /// that cannot be a token (zero, or wider than the token space).
    pub fn from_data(data: usize) -> Option<Self> {
        u32::try_from(data).ok().filter(|&v| v != 0).map(Self)
    }
}

impl std::fmt::Display for ClosureToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_data_pointer() {
        let token = ClosureToken(417);
        assert_eq!(ClosureToken::from_data(token.as_data()), Some(token));
    }

    #[test]
    fn zero_data_pointer_is_not_a_token() {
        assert_eq!(ClosureToken::from_data(0), None);
    }

    #[test]
    fn oversized_data_pointer_is_not_a_token() {
        assert_eq!(ClosureToken::from_data(u32::MAX as usize + 1), None);
    }
}
