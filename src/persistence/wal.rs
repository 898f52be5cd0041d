//! Write-ahead log for the `pmgd/` store.
//!
//! A batch's graph mutations are appended here before `GraphStore` applies
//! them to the arena, so recovery after a crash mid-commit can replay the
//! exact prefix of mutations that made it to disk.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("WAL corruption detected at sequence {0}")]
    Corruption(u64),
}

pub type WalResult<T> = Result<T, WalError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    CreateNode { node_id: u64, tag: String, properties: Vec<u8> },
    CreateEdge { edge_id: u64, source: u64, target: u64, edge_type: String, properties: Vec<u8> },
    SetNodeProperty { node_id: u64, key: String, value: Vec<u8> },
    RemoveNodeProperty { node_id: u64, key: String },
    SetEdgeProperty { edge_id: u64, key: String, value: Vec<u8> },
    RemoveEdgeProperty { edge_id: u64, key: String },
    Checkpoint { sequence: u64, timestamp: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalRecord {
    sequence: u64,
    entry: WalEntry,
    checksum: u32,
}

impl WalRecord {
    fn new(sequence: u64, entry: WalEntry) -> Self {
        let mut record = WalRecord { sequence, entry, checksum: 0 };
        record.checksum = record.calculate_checksum();
        record
    }

    fn calculate_checksum(&self) -> u32 {
        let bytes = bincode::serialize(&self.entry).unwrap_or_default();
        bytes.iter().fold(0u32, |acc, &b| acc ^ (b as u32))
    }

    fn verify_checksum(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }
}

/// Append-only log, one file per process lifetime, rooted at `<base>/wal/`.
pub struct Wal {
    path: PathBuf,
    current_file: Option<BufWriter<File>>,
    sequence: u64,
    sync_mode: bool,
}

impl Wal {
    pub fn new(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let sequence = Self::find_latest_sequence(&path)?;
        info!(path = %path.display(), sequence, "opened WAL");
        Ok(Wal { path, current_file: None, sequence, sync_mode: false })
    }

    pub fn set_sync_mode(&mut self, sync: bool) {
        self.sync_mode = sync;
        debug!(sync, "WAL sync mode changed");
    }

    pub fn append(&mut self, entry: WalEntry) -> WalResult<u64> {
        self.sequence += 1;
        let sequence = self.sequence;
        let record = WalRecord::new(sequence, entry);
        let data = bincode::serialize(&record)?;

        if self.current_file.is_none() {
            self.open_new_file()?;
        }
        if let Some(file) = self.current_file.as_mut() {
            file.write_all(&(data.len() as u32).to_le_bytes())?;
            file.write_all(&data)?;
            if self.sync_mode {
                file.flush()?;
            }
        }
        Ok(sequence)
    }

    pub fn flush(&mut self) -> WalResult<()> {
        if let Some(file) = self.current_file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn replay<F>(&self, from_sequence: u64, mut callback: F) -> WalResult<u64>
    where
        F: FnMut(&WalEntry) -> WalResult<()>,
    {
        info!(from_sequence, "replaying WAL");
        let files = self.get_wal_files()?;
        let mut replayed = 0u64;
        let mut last_sequence = from_sequence;

        for file_path in files {
            let file = File::open(&file_path)?;
            let mut reader = BufReader::new(file);
            let mut buf = Vec::new();

            loop {
                let mut len_bytes = [0u8; 4];
                match reader.read_exact(&mut len_bytes) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e.into()),
                }
                let len = u32::from_le_bytes(len_bytes) as usize;
                buf.resize(len, 0);
                if reader.read_exact(&mut buf).is_err() {
                    warn!("WAL truncated mid-record, stopping replay");
                    break;
                }
                let record: WalRecord = bincode::deserialize(&buf)?;
                if !record.verify_checksum() {
                    warn!(sequence = record.sequence, "WAL checksum mismatch");
                    return Err(WalError::Corruption(record.sequence));
                }
                if record.sequence < from_sequence {
                    continue;
                }
                callback(&record.entry)?;
                replayed += 1;
                last_sequence = record.sequence;
            }
        }
        info!(replayed, last_sequence, "WAL replay complete");
        Ok(last_sequence)
    }

    pub fn checkpoint(&mut self, sequence: u64) -> WalResult<()> {
        info!(sequence, "WAL checkpoint");
        let timestamp = chrono::Utc::now().timestamp();
        self.append(WalEntry::Checkpoint { sequence, timestamp })?;
        self.flush()?;
        self.current_file = None;
        Ok(())
    }

    fn open_new_file(&mut self) -> WalResult<()> {
        let filename = format!("wal-{:016x}.log", self.sequence);
        let file_path = self.path.join(filename);
        debug!(path = %file_path.display(), "opening WAL segment");
        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        self.current_file = Some(BufWriter::new(file));
        Ok(())
    }

    fn find_latest_sequence(path: &Path) -> WalResult<u64> {
        let files = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        let mut max_sequence = 0u64;
        for entry in files.flatten() {
            if let Some(filename) = entry.file_name().to_str() {
                if let Some(seq_str) = filename.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
                    if let Ok(seq) = u64::from_str_radix(seq_str, 16) {
                        max_sequence = max_sequence.max(seq);
                    }
                }
            }
        }
        Ok(max_sequence)
    }

    fn get_wal_files(&self) -> WalResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&self.path)?;
        for entry in entries.flatten() {
            if let Some(filename) = entry.file_name().to_str() {
                if filename.starts_with("wal-") && filename.ends_with(".log") {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wal_starts_at_sequence_zero() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::new(dir.path()).unwrap();
        assert_eq!(wal.current_sequence(), 0);
    }

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::new(dir.path()).unwrap();
        let entry = WalEntry::CreateNode { node_id: 1, tag: "image".into(), properties: vec![] };
        let seq = wal.append(entry).unwrap();
        assert_eq!(seq, 1);
        wal.flush().unwrap();
    }

    #[test]
    fn replay_recovers_every_appended_entry() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::new(dir.path()).unwrap();
        for i in 1..=5 {
            wal.append(WalEntry::CreateNode { node_id: i, tag: "generic".into(), properties: vec![] }).unwrap();
        }
        wal.flush().unwrap();

        let mut count = 0;
        wal.replay(0, |_entry| {
            count += 1;
            Ok(())
        }).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn checkpoint_writes_a_marker_entry() {
        let dir = TempDir::new().unwrap();
        let mut wal = Wal::new(dir.path()).unwrap();
        for i in 1..=10 {
            wal.append(WalEntry::CreateNode { node_id: i, tag: "generic".into(), properties: vec![] }).unwrap();
        }
        wal.checkpoint(10).unwrap();

        let mut found_checkpoint = false;
        wal.replay(0, |entry| {
            if matches!(entry, WalEntry::Checkpoint { .. }) {
                found_checkpoint = true;
            }
            Ok(())
        }).unwrap();
        assert!(found_checkpoint);
    }
}
