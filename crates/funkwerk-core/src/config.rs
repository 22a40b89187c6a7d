// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Persistent bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base name of the platform-services shared library ("platformservices"
    /// resolves to libplatformservices.so / .dylib / platformservices.dll).
    pub library_name: String,
    /// Extra directories searched before the platform defaults.
    pub library_search_paths: Vec<PathBuf>,
    /// Abort the process when the shared connection is released more times
    /// than it was obtained. Disabling this downgrades the fatal path to an
    /// error log plus the fatal hook; the connection stays unusable either way.
    pub abort_on_over_release: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library_name: "platformservices".into(),
            library_search_paths: Vec::new(),
            abort_on_over_release: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let config = BridgeConfig::default();
        assert_eq!(config.library_name, "platformservices");
        assert!(config.library_search_paths.is_empty());
        assert!(config.abort_on_over_release);
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.json");

        let mut config = BridgeConfig::default();
        config.library_name = "psmock".into();
        config.library_search_paths.push(PathBuf::from("/opt/ps/lib"));
        config.save(&path).expect("save");

        let loaded = BridgeConfig::load(&path).expect("load");
        assert_eq!(loaded.library_name, "psmock");
        assert_eq!(loaded.library_search_paths, vec![PathBuf::from("/opt/ps/lib")]);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(BridgeConfig::load(&path).is_err());
    }
}
