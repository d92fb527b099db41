//! Persistence of extracted candidates. Every saved record gets the next id, starting at 1.

use crate::candidate::CandidateRecord;
use crate::candidate::StoredCandidate;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access candidate store '{0}': {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("Invalid candidate store '{0}': {1}")]
    FormatError(PathBuf, #[source] serde_json::Error),

    #[error("Candidate store lock is poisoned")]
    LockError,
}

pub trait CandidateStore {
    /// Appends `record` and returns it with its assigned id.
    fn save(&self, record: CandidateRecord) -> Result<StoredCandidate, StoreError>;

    /// All stored candidates in insertion order.
    fn all(&self) -> Result<Vec<StoredCandidate>, StoreError>;
}

fn next_id(candidates: &[StoredCandidate]) -> u64 {
    candidates.iter().map(|candidate| candidate.id).max().unwrap_or(0) + 1
}

/// Candidates kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    candidates: Mutex<Vec<StoredCandidate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateStore for MemoryStore {
    fn save(&self, record: CandidateRecord) -> Result<StoredCandidate, StoreError> {
        let mut candidates = self.candidates.lock().map_err(|_| StoreError::LockError)?;
        let stored = StoredCandidate {
            id: next_id(&candidates),
            record,
        };
        candidates.push(stored.clone());
        Ok(stored)
    }

    fn all(&self) -> Result<Vec<StoredCandidate>, StoreError> {
        let candidates = self.candidates.lock().map_err(|_| StoreError::LockError)?;
        Ok(candidates.clone())
    }
}

/// Candidates kept as a JSON array in a single file, created on the first save.
///
/// Saves hold an exclusive lock on a sibling `.lock` file for the whole read-modify-write,
/// and replace the store by renaming a fully written temporary file over it.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Blocks until this process owns the store. The lock is released when the file is dropped.
    fn lock(&self) -> Result<File, StoreError> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|error| StoreError::IoError(path.clone(), error))?;
        file.lock().map_err(|error| StoreError::IoError(path, error))?;
        Ok(file)
    }

    fn write(&self, candidates: &[StoredCandidate]) -> Result<(), StoreError> {
        let io_error = |error: std::io::Error| StoreError::IoError(self.path.clone(), error);
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(directory).map_err(io_error)?;
        serde_json::to_writer_pretty(&mut file, candidates)
            .map_err(|error| StoreError::FormatError(self.path.clone(), error))?;
        file.flush().map_err(io_error)?;
        file.as_file().sync_all().map_err(io_error)?;
        file.persist(&self.path).map_err(|error| io_error(error.error))?;
        Ok(())
    }
}

impl CandidateStore for JsonFileStore {
    fn save(&self, record: CandidateRecord) -> Result<StoredCandidate, StoreError> {
        let _lock = self.lock()?;
        let mut candidates = self.all()?;
        let stored = StoredCandidate {
            id: next_id(&candidates),
            record,
        };
        candidates.push(stored.clone());
        self.write(&candidates)?;
        debug!(id = stored.id, path = %self.path.display(), "candidate saved");
        Ok(stored)
    }

    fn all(&self) -> Result<Vec<StoredCandidate>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str(&json).map_err(|error| StoreError::FormatError(self.path.clone(), error)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(StoreError::IoError(self.path.clone(), error)),
        }
    }
}
