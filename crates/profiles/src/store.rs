use std::path::Path;

use anyhow::Context;
use tracing::warn;

use crate::types::DeviceProfile;

/// Immutable catalog of vendor profiles, safe to share across tasks without
/// locking once loaded (spec §5 "Profile Store: immutable after load").
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Vec<DeviceProfile>,
}

impl ProfileStore {
    pub fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    /// Loads every `*.json` file in `dir` as a `DeviceProfile` (spec §6:
    /// "any structured config form"). A file that fails to parse is
    /// logged and skipped rather than failing the whole load, matching
    /// the rest of the system's "collect errors, keep going" posture.
    pub fn load_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut profiles = Vec::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading profile directory {}", dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<DeviceProfile>(&s).map_err(anyhow::Error::from))
            {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!(path = %path.display(), "failed to load profile: {e:#}"),
            }
        }

        Ok(Self::new(profiles))
    }
}
