use crate::fix::{Device, LocationFix};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;


/// Full-replacement view of every device the producer currently knows about.
///
/// Each poll reads a fresh snapshot; nothing is carried over between polls.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Fixes in source order, one per device with a usable location
    pub fixes: Vec<LocationFix>,

    /// Records dropped because they carried no location
    pub skipped: usize,
}

impl Snapshot {
    /// Read and decode the snapshot file.
    ///
    /// Any read or decode failure is returned as an error; there is no
    /// best-effort partial parse.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("Failed to read snapshot file {}", path.display()))?;

        Self::from_json(&data)
            .with_context(|| format!("Failed to decode snapshot file {}", path.display()))
    }

    /// Decode a JSON array of device records
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let devices: Vec<Device> =
            serde_json::from_slice(data).context("Failed to deserialize snapshot JSON")?;

        let mut snapshot = Snapshot::default();
        for device in devices {
            let identifier = device.identifier.clone();
            match device.into_fix() {
                Some(fix) => snapshot.fixes.push(fix),
                None => {
                    debug!(entity_id = %identifier, "Device has no location, skipping");
                    snapshot.skipped += 1;
                }
            }
        }

        Ok(snapshot)
    }

    /// Keep only fixes whose display name matches `name` (case-insensitive).
    ///
    /// Returns the number of fixes removed. A `None` filter keeps everything.
    pub fn retain_name(&mut self, name: Option<&str>) -> usize {
        let Some(name) = name else {
            return 0;
        };
        let before = self.fixes.len();
        self.fixes.retain(|fix| fix.matches_name(name));
        before - self.fixes.len()
    }

    /// Get fix count (for logging/display)
    pub fn fix_count(&self) -> usize {
        self.fixes.len()
    }
}
