//! File-backed calibration store.
//!
//! The state file uses the same `[persisted]` table as the main config, so a
//! state file can be pasted into a config verbatim.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uflow_core::BoxError;
use uflow_core::CalibrationStore;
use uflow_core::atomic::write_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    persisted: Option<Persisted>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Persisted {
    counts_per_ml: f32,
}

pub struct FileCalibrationStore {
    path: PathBuf,
    /// Used when the state file does not exist yet.
    seed: Option<f32>,
}

impl FileCalibrationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, seed: None }
    }

    pub fn with_seed(mut self, seed: Option<f32>) -> Self {
        self.seed = seed;
        self
    }

    fn read(&self) -> Result<Option<f32>, BoxError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("read {}: {e}", self.path.display()).into()),
        };
        let state: StateFile = toml::from_str(&text)
            .map_err(|e| format!("parse {}: {e}", self.path.display()))?;
        Ok(state.persisted.map(|p| p.counts_per_ml))
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn load(&mut self) -> Result<Option<f32>, BoxError> {
        let stored = self.read()?;
        if stored.is_none() && self.seed.is_some() {
            tracing::info!(seed = ?self.seed, "no persisted scale; using calibration CSV");
        }
        Ok(stored.or(self.seed))
    }

    fn store(&mut self, counts_per_ml: f32) -> Result<(), BoxError> {
        let state = StateFile {
            persisted: Some(Persisted { counts_per_ml }),
        };
        let text = toml::to_string(&state)?;
        write_atomic(&self.path, text.as_bytes())
            .map_err(|e| format!("write {}: {e}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), counts_per_ml, "strain gauge scale persisted");
        Ok(())
    }
}

/// Read a state file without a store, for `self-check`.
pub fn read_persisted(path: PathBuf) -> Result<Option<f32>, BoxError> {
    FileCalibrationStore::new(path).read()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FileCalibrationStore::new(dir.path().join("state.toml"));
        assert_eq!(s.load().unwrap(), None);
    }

    #[test]
    fn seed_applies_only_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        let mut s = FileCalibrationStore::new(path).with_seed(Some(19.5));
        assert_eq!(s.load().unwrap(), Some(19.5));
        s.store(21.0).unwrap();
        assert_eq!(s.load().unwrap(), Some(21.0));
    }

    #[test]
    fn stored_scale_reads_back_as_persisted_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        FileCalibrationStore::new(path.clone()).store(18.25).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[persisted]"), "{text}");
        assert!(!path.with_extension("new").exists());
        assert_eq!(read_persisted(path).unwrap(), Some(18.25));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "persisted = [").unwrap();
        let err = FileCalibrationStore::new(path).load().unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
