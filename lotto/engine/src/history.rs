use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind as IoErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One saved pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Creation time in unix milliseconds, unique within a log.
    pub id: String,
    /// Creation time.
    pub date: DateTime<Utc>,
    /// The saved numbers, ascending.
    pub numbers: Vec<u32>,
}

/// Append-only JSON-lines record of generated picks.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryLog {
    /// Opens (lazily) the log at `path`; nothing is created until the first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File backing the log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves `numbers` under a fresh id.
    pub fn append(&self, numbers: &[u32]) -> Result<HistoryEntry, EngineError> {
        let _guard = self.write_lock.lock();
        let date = Utc::now();
        let mut id = date.timestamp_millis();
        let last = self
            .read_entries()?
            .iter()
            .filter_map(|entry| entry.id.parse::<i64>().ok())
            .max();
        if let Some(last) = last {
            if id <= last {
                id = last + 1;
            }
        }
        let mut sorted = numbers.to_vec();
        sorted.sort_unstable();
        let entry = HistoryEntry {
            id: id.to_string(),
            date,
            numbers: sorted,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error("creating directory", &err))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error("opening", &err))?;
        write_entry(&mut file, &entry).map_err(|err| self.io_error("appending to", &err))?;
        Ok(entry)
    }

    /// Every saved pick, newest first.
    pub fn list(&self) -> Result<Vec<HistoryEntry>, EngineError> {
        let mut entries = self.read_entries()?;
        entries.reverse();
        Ok(entries)
    }

    /// Removes the entry with `id`; returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool, EngineError> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        let mut file = File::create(&self.path).map_err(|err| self.io_error("rewriting", &err))?;
        for entry in &entries {
            write_entry(&mut file, entry).map_err(|err| self.io_error("rewriting", &err))?;
        }
        Ok(true)
    }

    /// Drops the whole log.
    pub fn clear(&self) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error("removing", &err)),
        }
    }

    fn read_entries(&self) -> Result<Vec<HistoryEntry>, EngineError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.io_error("opening", &err)),
        };
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| self.io_error("reading", &err))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|err| {
                EngineError::History(format!("{} line {}: {err}", self.path.display(), idx + 1))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn io_error(&self, action: &str, err: &std::io::Error) -> EngineError {
        EngineError::History(format!("{action} {}: {err}", self.path.display()))
    }
}

fn write_entry(file: &mut File, entry: &HistoryEntry) -> std::io::Result<()> {
    serde_json::to_writer(&mut *file, entry)?;
    file.write_all(b"\n")
}
