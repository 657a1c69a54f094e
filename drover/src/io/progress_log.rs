//! Append-only session journal (`claude-progress.txt`).
//!
//! Each entry is written as
//!
//! ```text
//!
//!
//! ---
//!
//! ## Session Entry: 2025-01-31 14:02:11
//!
//! <content>
//! ```
//!
//! Entries are never rewritten. The agent reads this file at the start of each
//! session to pick up where the previous one stopped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{debug, instrument};

/// Timestamp format used in entry headers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ENTRY_DELIMITER: &str = "\n\n---\n\n## Session Entry: ";

/// One journal entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub timestamp: NaiveDateTime,
    pub content: String,
}

impl ProgressEntry {
    fn render(&self) -> String {
        format!(
            "{ENTRY_DELIMITER}{}\n\n{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.content
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry stamped with the current local time.
    pub fn append(&self, content: &str) -> Result<ProgressEntry> {
        self.append_at(Local::now().naive_local(), content)
    }

    /// Append an entry with an explicit timestamp.
    ///
    /// The entry goes out in a single write and is synced before the file
    /// handle is released, so a failure leaves earlier entries untouched.
    #[instrument(skip_all, fields(path = %self.path.display(), bytes = content.len()))]
    pub fn append_at(&self, timestamp: NaiveDateTime, content: &str) -> Result<ProgressEntry> {
        let entry = ProgressEntry {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            content: content.to_string(),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create progress log dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(entry.render().as_bytes())
            .with_context(|| format!("append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("flush {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync {}", self.path.display()))?;
        debug!("progress entry appended");
        Ok(entry)
    }

    /// Parse the journal back into entries, oldest first.
    ///
    /// A missing file has no entries. Text before the first delimiter is ignored.
    pub fn entries(&self) -> Result<Vec<ProgressEntry>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read {}", self.path.display())),
        };
        parse_entries(&contents).with_context(|| format!("parse {}", self.path.display()))
    }
}

fn parse_entries(contents: &str) -> Result<Vec<ProgressEntry>> {
    contents
        .split(ENTRY_DELIMITER)
        .skip(1)
        .map(|chunk| {
            let (header, content) = chunk.split_once("\n\n").unwrap_or((chunk, ""));
            let timestamp = NaiveDateTime::parse_from_str(header.trim(), TIMESTAMP_FORMAT)
                .map_err(|err| anyhow!("malformed entry header '{header}': {err}"))?;
            Ok(ProgressEntry {
                timestamp,
                content: content.to_string(),
            })
        })
        .collect()
}
