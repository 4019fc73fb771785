//! State persistence: dump/reload of the declared process set.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::process::{LogSpec, ProcessSpec, RestartPolicy, Status};
use crate::registry::Registry;

/// Serialised form of one declared process. Round-trips the launch spec,
/// restart policy, log spec, and the last observed status; resurrect uses
/// the status to decide which entries to re-spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpRecord {
    pub id: u64,
    pub name: String,
    pub spec: ProcessSpec,
    pub policy: RestartPolicy,
    pub logs: LogSpec,
    pub status: Status,
}

/// Error type for dump file operations.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Encode(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Encode(e) => write!(f, "encoding error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e)
    }
}

/// Writes and reads the dump file. Writes go through a temp file in the
/// same directory and a rename, so a concurrent reader sees either the old
/// or the new document.
pub struct StateStore {
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialises the registered set to the dump file. Returns the number
    /// of records written.
    pub fn save(&self, registry: &Registry) -> Result<usize, StoreError> {
        let records: Vec<DumpRecord> = registry
            .list()
            .iter()
            .map(|p| {
                let (spec, policy, logs, status) = p.persist_view();
                DumpRecord {
                    id: p.id,
                    name: p.name.clone(),
                    spec,
                    policy,
                    logs,
                    status,
                }
            })
            .collect();

        let _gate = self.write_gate.lock().unwrap();
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(records.len())
    }

    /// Reads the dump file. A missing file yields an empty set.
    pub fn load(&self) -> Result<Vec<DumpRecord>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
