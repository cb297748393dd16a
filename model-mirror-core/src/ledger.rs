//! Completion ledger: remembers which repositories were mirrored by earlier runs.
//!
//! Stored as a JSON object `{ "<repo>": { "status": "<status>" } }` and rewritten
//! atomically after every completion.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::{ModelStatus, RepoId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub status: ModelStatus,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<RepoId, LedgerEntry>,
}

impl Ledger {
    /// Opens the ledger at `path`. A missing file starts empty; a corrupt one is reinitialised.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ledger is corrupt, reinitialising");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        let ledger = Self { path, entries };
        ledger.save()?;
        info!(path = %ledger.path.display(), entries = ledger.entries.len(), "Opened completion ledger");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an earlier run left a complete copy at the destination.
    pub fn is_mirrored(&self, repo: &RepoId) -> bool {
        self.entries
            .get(repo)
            .is_some_and(|entry| entry.status.is_mirrored())
    }

    pub fn get(&self, repo: &RepoId) -> Option<LedgerEntry> {
        self.entries.get(repo).copied()
    }

    pub fn record(&mut self, repo: &RepoId, status: ModelStatus) {
        self.entries.insert(repo.clone(), LedgerEntry { status });
    }

    pub fn save(&self) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(&self.entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
