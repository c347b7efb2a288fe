//! Work-group size profiles.
//!
//! A profile maps kernel names to the local work-group size used when the
//! kernel is dispatched. Profiles are produced offline (see the
//! `workgroup_sweep` bench) and loaded at startup; kernels missing from the
//! profile use the default size.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Local work-group sizes per kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchProfile {
    /// Size used by kernels without an entry.
    #[serde(default = "default_local_size")]
    pub default_local_size: usize,
    /// Per-kernel overrides.
    #[serde(default)]
    pub kernels: BTreeMap<String, usize>,
}

fn default_local_size() -> usize {
    DispatchProfile::DEFAULT_LOCAL_SIZE
}

impl Default for DispatchProfile {
    fn default() -> Self {
        Self { default_local_size: default_local_size(), kernels: BTreeMap::new() }
    }
}

impl DispatchProfile {
    /// Work-group size when nothing else is known.
    pub const DEFAULT_LOCAL_SIZE: usize = 256;

    /// Local size for `kernel`, never zero.
    pub fn local_size(&self, kernel: &str) -> usize {
        self.kernels.get(kernel).copied().unwrap_or(self.default_local_size).max(1)
    }

    /// Record a tuned size for `kernel`.
    pub fn set_local_size(&mut self, kernel: &str, size: usize) {
        self.kernels.insert(kernel.to_string(), size.max(1));
    }

    /// Load a profile from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the profile as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_kernel_uses_default() {
        let mut profile = DispatchProfile::default();
        profile.set_local_size("compute_hashes", 64);
        assert_eq!(profile.local_size("compute_hashes"), 64);
        assert_eq!(profile.local_size("gather"), DispatchProfile::DEFAULT_LOCAL_SIZE);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let profile: DispatchProfile =
            serde_json::from_str(r#"{ "default_local_size": 0 }"#).unwrap();
        assert_eq!(profile.local_size("anything"), 1);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join("sph_kernel_profile_test.json");
        let mut profile = DispatchProfile::default();
        profile.set_local_size("compute_neighbor_list", 32);
        profile.save(&path).unwrap();
        assert_eq!(DispatchProfile::load(&path).unwrap(), profile);
        let _ = fs::remove_file(&path);
    }
}
