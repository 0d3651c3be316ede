//! Run directory: one JSON file per sweep, named by UTC start time.

use crate::record::{RecordError, SweepRecord};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M-%S";

/// Attempts `save_unique` makes before giving up on a free file name.
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} already exists", path.display())]
    Exists { path: PathBuf },

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<YYYY-MM-DD HH-MM-SS>_<run_name>.json`
    pub fn file_name(started_at: DateTime<Utc>, run_name: &str) -> String {
        format!(
            "{}_{}.json",
            started_at.format(TIMESTAMP_FORMAT),
            sanitize_run_name(run_name)
        )
    }

    pub fn path_for<T>(&self, record: &SweepRecord<T>) -> PathBuf {
        self.dir
            .join(Self::file_name(record.run.started_at, &record.run.run_name))
    }

    /// `path_for` with a `_<n>` suffix before the extension for `n > 1`.
    fn numbered_path_for<T>(&self, record: &SweepRecord<T>, n: u32) -> PathBuf {
        if n <= 1 {
            return self.path_for(record);
        }
        let stem = format!(
            "{}_{}_{n}.json",
            record.run.started_at.format(TIMESTAMP_FORMAT),
            sanitize_run_name(&record.run.run_name)
        );
        self.dir.join(stem)
    }

    /// Writes `record` into the run directory. Never replaces an existing
    /// file.
    pub fn save<T: Serialize>(&self, record: &SweepRecord<T>) -> Result<PathBuf, StoreError> {
        let encoded = record.encode()?;
        let path = self.path_for(record);
        self.write_new(&path, &encoded)?;
        self.log_saved(&path, record, &encoded);
        Ok(path)
    }

    /// Like [`RunStore::save`], but when the name is taken (same run name
    /// started within the same second) tries `_2`, `_3`, ... suffixes.
    pub fn save_unique<T: Serialize>(
        &self,
        record: &SweepRecord<T>,
    ) -> Result<PathBuf, StoreError> {
        let encoded = record.encode()?;
        let mut last = self.path_for(record);
        for n in 1..=MAX_NAME_ATTEMPTS {
            let path = self.numbered_path_for(record, n);
            match self.write_new(&path, &encoded) {
                Ok(()) => {
                    self.log_saved(&path, record, &encoded);
                    return Ok(path);
                }
                Err(StoreError::Exists { .. }) => {
                    debug!(path = %path.display(), "Record name taken, trying next suffix");
                    last = path;
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Exists { path: last })
    }

    fn write_new(&self, path: &Path, encoded: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Exists {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        commit(path, file, |file| {
            file.write_all(encoded.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()
        })
    }

    fn log_saved<T>(&self, path: &Path, record: &SweepRecord<T>, encoded: &str) {
        info!(
            path = %path.display(),
            points = record.result.points.len(),
            bytes = encoded.len(),
            "Sweep record saved"
        );
    }

    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<SweepRecord<T>, StoreError> {
        let raw = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let record = SweepRecord::decode(&raw)?;
        debug!(path = %path.display(), "Sweep record loaded");
        Ok(record)
    }

    /// Record files in the directory, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Runs `write` on a freshly created file; on failure the file is closed and
/// removed so no truncated record is left behind.
fn commit<W>(
    path: &Path,
    mut file: W,
    write: impl FnOnce(&mut W) -> io::Result<()>,
) -> Result<(), StoreError> {
    let written = write(&mut file);
    drop(file);
    written.map_err(|e| {
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "Failed to remove partial record");
        }
        StoreError::io(path, e)
    })
}

/// Strips path separators and other characters that cannot appear in a
/// file name on common platforms.
fn sanitize_run_name(run_name: &str) -> String {
    let cleaned: String = run_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "run".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_uses_dashed_utc_timestamp() {
        let t = Utc.with_ymd_and_hms(2024, 8, 13, 16, 11, 47).unwrap();
        assert_eq!(
            RunStore::file_name(t, "Vg sweep 4K"),
            "2024-08-13 16-11-47_Vg sweep 4K.json"
        );
    }

    #[test]
    fn run_names_cannot_escape_directory() {
        assert_eq!(sanitize_run_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_run_name("a\\b:c"), "a_b_c");
        assert_eq!(sanitize_run_name(".."), "run");
        assert_eq!(sanitize_run_name("   "), "run");
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-08-13 16-11-47_vg.json");
        let file = fs::File::create(&path).unwrap();

        let err = commit(&path, file, |file| {
            file.write_all(b"{\"format\": \"gate-")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!path.exists());
        assert!(RunStore::new(dir.path()).list().unwrap().is_empty());
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
