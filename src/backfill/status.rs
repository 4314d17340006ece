//! Backfill progress document.
//!
//! Written atomically (temp file + rename) so a reader never observes a
//! half-written document, matching [`crate::lock`]'s discipline. Reading
//! self-heals a document left at `in_progress` with `progress >= 1.0` by a
//! process that exited before writing its final `complete` transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    InProgress,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillStatus {
    pub state: BackfillState,
    pub contracts_total: u64,
    pub contracts_done: u64,
    pub gaps_filled: u64,
    pub progress: f64,
    pub incomplete_contracts: Vec<String>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackfillStatus {
    pub fn new(contracts_total: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            state: BackfillState::InProgress,
            contracts_total,
            contracts_done: 0,
            gaps_filled: 0,
            progress: if contracts_total == 0 { 1.0 } else { 0.0 },
            incomplete_contracts: Vec::new(),
            errors: Vec::new(),
            started_at,
            updated_at: started_at,
        }
    }

    /// A document left `in_progress` at `progress >= 1.0` means the writer
    /// died between finishing the last contract and writing the terminal
    /// `complete` transition; correct it on read rather than report a job
    /// as perpetually running.
    fn self_healed(mut self) -> Self {
        if self.state == BackfillState::InProgress && self.progress >= 1.0 {
            self.state = BackfillState::Complete;
        }
        self
    }
}

pub fn write_status(path: &Path, status: &BackfillStatus) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(status)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path)?;
    Ok(())
}

pub fn read_status(path: &Path) -> anyhow::Result<Option<BackfillStatus>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(path)?;
    let status: BackfillStatus = serde_json::from_slice(&raw)?;
    let healed = status.clone().self_healed();
    if healed != status {
        write_status(path, &healed)?;
    }
    Ok(Some(healed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let status = BackfillStatus::new(10, Utc::now());
        write_status(&path, &status).unwrap();

        let read_back = read_status(&path).unwrap().unwrap();
        assert_eq!(read_back.contracts_total, 10);
        assert_eq!(read_back.state, BackfillState::InProgress);
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        assert!(read_status(&path).unwrap().is_none());
    }

    #[test]
    fn stuck_in_progress_at_full_progress_self_heals_to_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut status = BackfillStatus::new(5, Utc::now());
        status.contracts_done = 5;
        status.progress = 1.0;
        write_status(&path, &status).unwrap();

        let read_back = read_status(&path).unwrap().unwrap();
        assert_eq!(read_back.state, BackfillState::Complete);

        // the correction itself was persisted back to disk.
        let reread = read_status(&path).unwrap().unwrap();
        assert_eq!(reread.state, BackfillState::Complete);
    }

    #[test]
    fn partial_progress_in_progress_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut status = BackfillStatus::new(5, Utc::now());
        status.contracts_done = 2;
        status.progress = 0.4;
        write_status(&path, &status).unwrap();

        let read_back = read_status(&path).unwrap().unwrap();
        assert_eq!(read_back.state, BackfillState::InProgress);
    }
}
