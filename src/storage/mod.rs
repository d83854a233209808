//! # Storage Module - Daily Log Files
//!
//! Append-only daily log persistence for validated readings. Each reading is
//! written as one formatted line to a path derived from its UTC date:
//!
//! ```text
//! <log_base_dir>/
//! ├── 2026-08-05/
//! │   └── sensor_data.log
//! └── 2026-08-06/
//!     └── sensor_data.log
//! ```
//!
//! The date directory is created on demand. Write failures are returned to
//! the caller to log; they never abort the cycle and are independent of the
//! time-series path.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Daily log file sink rooted at a base directory.
#[derive(Debug, Clone)]
pub struct DailyLogStore {
    base_dir: PathBuf,
    file_name: String,
}

impl DailyLogStore {
    pub fn new(base_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Path the given timestamp's line lands in: `<base>/<YYYY-MM-DD>/<file>`.
    pub fn path_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.base_dir
            .join(timestamp.format("%Y-%m-%d").to_string())
            .join(&self.file_name)
    }

    /// Append one line for a reading taken at `timestamp`, creating the date
    /// directory if absent.
    pub async fn append(&self, timestamp: DateTime<Utc>, line: &str) -> Result<()> {
        let path = self.path_for(timestamp);
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("daily log path has no parent: {}", path.display()))?;

        fs::create_dir_all(dir)
            .await
            .map_err(|e| anyhow!("Failed to create log directory {}: {}", dir.display(), e))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| anyhow!("Failed to open log file {}: {}", path.display(), e))?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| anyhow!("Failed to write log file {}: {}", path.display(), e))?;

        file.flush()
            .await
            .map_err(|e| anyhow!("Failed to flush log file {}: {}", path.display(), e))?;

        Ok(())
    }
}
