use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::geo::Position;

const SNAPSHOT_TMP_EXTENSION: &str = "json.tmp";

/// The two position slots. `current` is where the device last said it was;
/// `selected` is where the next note will be anchored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationStore {
    current: Option<Position>,
    selected: Option<Position>,
}

impl LocationStore {
    pub fn current(&self) -> Option<&Position> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, position: Position) {
        self.current = Some(position);
    }

    pub fn selected(&self) -> Option<&Position> {
        self.selected.as_ref()
    }

    pub fn set_selected(&mut self, position: Position) {
        self.selected = Some(position);
    }

    /// A device fix moves both slots.
    pub fn apply_device_fix(&mut self, position: Position) {
        self.current = Some(position);
        self.selected = Some(position);
    }

    /// A place search only retargets the next note.
    pub fn apply_search_result(&mut self, position: Position) {
        self.selected = Some(position);
    }

    /// Missing snapshots give an empty store; unreadable ones are logged and ignored.
    pub fn restore(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(store)) => store,
            Ok(None) => Self::default(),
            Err(err) => {
                tracing::warn!(?err, "discarding unreadable location snapshot {}", path.display());
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading location snapshot {}", path.display()))
            }
        };
        let store = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing location snapshot {}", path.display()))?;
        Ok(Some(store))
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("serialising location snapshot")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("ensuring state dir {}", parent.display()))?;
        }
        let tmp_path = path.with_extension(SNAPSHOT_TMP_EXTENSION);
        fs::write(&tmp_path, &json).with_context(|| {
            format!("writing temporary location snapshot {}", tmp_path.display())
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!("atomically persisting location snapshot {}", path.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use time::macros::datetime;

    #[test]
    fn device_fix_sets_both_search_sets_selected_only() {
        let mut store = LocationStore::default();
        store.apply_device_fix(Position::new(1.0, 1.0));
        assert_eq!(store.current(), Some(&Position::new(1.0, 1.0)));
        assert_eq!(store.selected(), Some(&Position::new(1.0, 1.0)));

        store.apply_search_result(Position::new(5.0, 6.0));
        assert_eq!(store.current(), Some(&Position::new(1.0, 1.0)));
        assert_eq!(store.selected(), Some(&Position::new(5.0, 6.0)));
    }

    #[test]
    fn snapshot_survives_round_trip() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("state/location.json");
        let mut store = LocationStore::default();
        store.set_current(
            Position::new(48.1, 11.5).with_fix(Some(12.0), datetime!(2024-05-01 10:00 UTC)),
        );
        store.set_selected(Position::new(48.2, 11.6));
        store.persist(&path)?;

        assert_eq!(LocationStore::restore(&path), store);
        assert!(!path.with_extension(SNAPSHOT_TMP_EXTENSION).exists());
        Ok(())
    }

    #[test]
    fn corrupt_or_missing_snapshot_restores_empty() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let missing = temp.path().join("missing.json");
        assert_eq!(LocationStore::restore(&missing), LocationStore::default());

        let corrupt = temp.path().join("corrupt.json");
        fs::write(&corrupt, b"{ not json")?;
        assert_eq!(LocationStore::restore(&corrupt), LocationStore::default());
        Ok(())
    }
}
