//! Daily rotating log file for child stderr.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

/// A log file that rolls over at local midnight.
///
/// Files are named `<prefix>-YYYY-MM-DD.log` inside `dir`. Every call to
/// [`open`](Self::open) picks the file for the current day, so a long-lived
/// invoker naturally rotates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLog {
    dir: PathBuf,
    prefix: String,
}

impl DailyLog {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    /// Path of today's file.
    pub fn current_path(&self) -> PathBuf {
        self.path_for(Local::now().date_naive())
    }

    /// Opens today's file for appending, creating the directory if needed.
    pub fn open(&self) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())
    }
}
