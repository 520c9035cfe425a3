//! Run history: one JSON [`RunReport`] per line, append-only.
//!
//! A crash mid-write can only damage the last line; malformed lines are
//! skipped on read.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::scheduler::RunReport;

pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, report: &RunReport) -> io::Result<()> {
        let json = serde_json::to_string(report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// All readable reports, oldest first.
    pub fn read_all(&self) -> io::Result<Vec<RunReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut reports = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunReport>(&line) {
                Ok(report) => reports.push(report),
                Err(e) => debug!(line = n + 1, "skipping malformed history line: {e}"),
            }
        }
        Ok(reports)
    }

    /// Latest report recorded for `run_id`.
    pub fn observe(&self, run_id: &str) -> io::Result<Option<RunReport>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|r| r.run_id == run_id))
    }
}
