//! Measurement history persistence
//!
//! An append-only JSON file holding every delivered result record as one
//! array. A missing or unreadable file is rewritten as an empty history
//! rather than failing the session that tried to record into it.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::ComputeError;
use crate::hrv::HrvResult;
use crate::session::DeliverySink;

/// Append-only store of result records backed by one JSON file.
#[derive(Debug, Clone)]
pub struct MeasurementStore {
    path: PathBuf,
}

impl MeasurementStore {
    /// Open the store at `path`, creating or repairing the backing file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ComputeError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn initialize(&self) -> Result<(), ComputeError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                if serde_json::from_str::<Vec<HrvResult>>(&contents).is_err() {
                    warn!(
                        "measurement history {} unreadable, starting fresh",
                        self.path.display()
                    );
                    self.write_records(&[])?;
                }
            }
            Err(_) => self.write_records(&[])?,
        }
        Ok(())
    }

    fn write_records(&self, records: &[HrvResult]) -> Result<(), ComputeError> {
        fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        Ok(())
    }

    /// Append one record to the history.
    pub fn append(&self, record: &HrvResult) -> Result<(), ComputeError> {
        let mut records = self.load()?;
        records.push(record.clone());
        self.write_records(&records)
    }

    /// Load every stored record, oldest first.
    pub fn load(&self) -> Result<Vec<HrvResult>, ComputeError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl DeliverySink for MeasurementStore {
    fn deliver(&mut self, record: &HrvResult) -> Result<(), ComputeError> {
        self.append(record)
    }
}
