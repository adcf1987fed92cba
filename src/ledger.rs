use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::ProjectId;
use crate::error::WgsError;

/// Append-only record of fully-processed project identifiers, one per
/// line, kept next to the output file. The append-and-flush after each
/// project is the pipeline's sole durability checkpoint.
pub struct Ledger {
    path: Utf8PathBuf,
    file: File,
}

impl Ledger {
    pub fn open_append(path: impl Into<Utf8PathBuf>) -> Result<Self, WgsError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| WgsError::Filesystem(format!("open ledger {path}: {err}")))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Append a completed project and flush immediately.
    pub fn record(&mut self, project: &ProjectId) -> Result<(), WgsError> {
        writeln!(self.file, "{project}")
            .and_then(|_| self.file.flush())
            .map_err(|err| WgsError::Filesystem(format!("update ledger {}: {err}", self.path)))
    }

    /// Delete the ledger once its crash-recovery purpose is served.
    pub fn remove(self) -> Result<(), WgsError> {
        let Ledger { path, file } = self;
        drop(file);
        fs::remove_file(path.as_std_path()).map_err(|err| WgsError::LedgerCleanup {
            ledger: path,
            message: err.to_string(),
        })
    }
}

/// Read the identifiers recorded by a previous run. A missing ledger is
/// an empty one.
pub fn load_entries(path: &Utf8Path) -> Result<Vec<String>, WgsError> {
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path.as_std_path())
        .map_err(|err| WgsError::Filesystem(format!("read ledger {path}: {err}")))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line =
            line.map_err(|err| WgsError::Filesystem(format!("read ledger {path}: {err}")))?;
        let entry = line.trim();
        if !entry.is_empty() {
            entries.push(entry.to_string());
        }
    }
    Ok(entries)
}
