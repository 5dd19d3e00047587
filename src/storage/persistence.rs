//! Write-Ahead Logging (WAL) and snapshots for the aggregate table

use crate::core::{AggregateRecord, ArchiveError, Result};
use crate::storage::table::AggregateTable;
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Each merge is logged as the full post-merge record, so replaying a frame
/// twice lands on the same state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Merge { record: AggregateRecord, at_ms: i64 },
}

impl WalEntry {
    pub fn merge(record: AggregateRecord) -> Self {
        Self::Merge {
            record,
            at_ms: Utc::now().timestamp_millis(),
        }
    }
}

// ============================================================================
// Table Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub version: u32,
    pub records: Vec<AggregateRecord>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub record_count: usize,
    pub type_index: String,
}

impl TableSnapshot {
    pub fn new(table: &AggregateTable, type_index: &str) -> Self {
        let records: Vec<AggregateRecord> = table.records().cloned().collect();
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            metadata: SnapshotMetadata {
                created_at: Utc::now().timestamp_millis(),
                record_count: records.len(),
                type_index: type_index.to_string(),
            },
            records,
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync after every WAL append
    Sync,
    /// flush to the OS, no fsync
    #[default]
    Async,
    /// no WAL, memory only
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" => Ok(Self::None),
            other => Err(ArchiveError::Config(format!(
                "unknown durability mode '{}' (expected sync, async or none)",
                other
            ))),
        }
    }
}

fn serialization_error(context: &str, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Serialization(format!("{}: {}", context, err))
}

fn io_error(context: &str, err: std::io::Error) -> ArchiveError {
    ArchiveError::StoreUnavailable(format!("{}: {}", context, err))
}

// ============================================================================
// WAL Manager
// ============================================================================

/// Append-only frame log: `[u32 little-endian length][rmp payload]`.
///
/// `committed_len` is the end of the last frame that was fully written. A
/// failed append cuts the file back to it, so the log never holds bytes that
/// were reported as rejected.
pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    committed_len: u64,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
    #[cfg(test)]
    pub(crate) torn_write_at: Option<usize>,
    #[cfg(test)]
    pub(crate) fail_next_truncate: bool,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("Failed to create WAL directory", e))?;
        }

        let (wal_file, committed_len) = if durability_mode != DurabilityMode::None {
            let file = Self::open_append(&wal_path)?;
            let len = file
                .metadata()
                .map_err(|e| io_error("Failed to stat WAL file", e))?
                .len();
            (Some(BufWriter::new(file)), len)
        } else {
            (None, 0)
        };

        Ok(Self {
            wal_path,
            wal_file,
            committed_len,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
            #[cfg(test)]
            torn_write_at: None,
            #[cfg(test)]
            fail_next_truncate: false,
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_error("Failed to open WAL file", e))
    }

    /// Returns the append handle, reopening it (and cutting any leftover
    /// tail) if an earlier failure dropped it.
    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.wal_file.is_none() {
            let file = Self::open_append(&self.wal_path)?;
            file.set_len(self.committed_len)
                .map_err(|e| io_error("Failed to repair WAL tail", e))?;
            self.wal_file = Some(BufWriter::new(file));
        }
        self.wal_file
            .as_mut()
            .ok_or_else(|| ArchiveError::StoreUnavailable("WAL file not initialized".to_string()))
    }

    /// Drops whatever the failed append left behind: unflushed bytes in the
    /// buffer and any partial frame already on disk.
    fn discard_tail(&mut self) {
        let Some(writer) = self.wal_file.take() else {
            return;
        };
        let (file, _unflushed) = writer.into_parts();
        match file.set_len(self.committed_len) {
            Ok(()) => self.wal_file = Some(BufWriter::new(file)),
            Err(e) => warn!(
                "Failed to cut torn frame from {}, repairing on next append: {}",
                self.wal_path.display(),
                e
            ),
        }
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized =
            rmp_serde::to_vec(entry).map_err(|e| serialization_error("Failed to serialize WAL entry", e))?;
        let len = serialized.len() as u32;

        let mut frame = Vec::with_capacity(4 + serialized.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&serialized);

        #[cfg(test)]
        if let Some(written) = self.torn_write_at.take() {
            let partial = &frame[..written.min(frame.len())];
            let writer = self.writer()?;
            let _ = writer.write_all(partial).and_then(|()| writer.flush());
            self.discard_tail();
            return Err(io_error("Failed to write WAL", std::io::Error::other("injected torn write")));
        }

        let sync = self.durability_mode == DurabilityMode::Sync;
        let written = {
            let writer = self.writer()?;
            writer
                .write_all(&frame)
                .and_then(|()| writer.flush())
                .and_then(|()| if sync { writer.get_ref().sync_all() } else { Ok(()) })
        };
        if let Err(e) = written {
            self.discard_tail();
            return Err(io_error("Failed to write WAL", e));
        }

        self.committed_len += frame.len() as u64;
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Reads every complete frame. A torn frame at the tail (crash during
    /// append) ends the log.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        self.scan().map(|(entries, _)| entries)
    }

    /// Replays the log and cuts a torn tail off the file, so later appends
    /// start at a frame boundary.
    pub fn replay(&mut self) -> Result<Vec<WalEntry>> {
        let (entries, valid_len) = self.scan()?;
        if self.durability_mode != DurabilityMode::None && valid_len < self.committed_len {
            warn!(
                "Truncating {} torn bytes from {}",
                self.committed_len - valid_len,
                self.wal_path.display()
            );
            self.committed_len = valid_len;
            self.discard_tail();
        }
        Ok(entries)
    }

    fn scan(&self) -> Result<(Vec<WalEntry>, u64)> {
        if !self.wal_path.exists() {
            return Ok((Vec::new(), 0));
        }
        let file = File::open(&self.wal_path).map_err(|e| io_error("Failed to open WAL for reading", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| io_error("Failed to stat WAL file", e))?
            .len();
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(io_error("Failed to read WAL entry length", e)),
            }
            let len = u32::from_le_bytes(len_bytes) as u64;
            if offset + 4 + len > file_len {
                warn!(
                    "Ignoring torn WAL frame at tail of {} ({} entries recovered)",
                    self.wal_path.display(),
                    entries.len()
                );
                break;
            }
            let mut data = vec![0u8; len as usize];
            reader
                .read_exact(&mut data)
                .map_err(|e| io_error("Failed to read WAL entry data", e))?;
            let entry: WalEntry = rmp_serde::from_slice(&data)
                .map_err(|e| serialization_error("Failed to deserialize WAL entry", e))?;
            entries.push(entry);
            offset += 4 + len;
        }
        Ok((entries, offset))
    }

    /// Empties the log in place. The append handle stays open whether or not
    /// the truncate succeeds.
    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_truncate) {
            return Err(io_error(
                "Failed to truncate WAL",
                std::io::Error::other("injected truncate failure"),
            ));
        }

        let sync = self.durability_mode == DurabilityMode::Sync;
        let writer = self.writer()?;
        writer.flush().map_err(|e| io_error("Failed to flush WAL", e))?;
        let file = writer.get_ref();
        file.set_len(0).map_err(|e| io_error("Failed to truncate WAL", e))?;
        if sync {
            file.sync_all().map_err(|e| io_error("Failed to sync WAL", e))?;
        }
        self.committed_len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &TableSnapshot) -> Result<()> {
        let parent = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).map_err(|e| io_error("Failed to create snapshot directory", e))?;

        let serialized =
            rmp_serde::to_vec(snapshot).map_err(|e| serialization_error("Failed to serialize snapshot", e))?;
        let temp = NamedTempFile::new_in(&parent).map_err(|e| io_error("Failed to create temp file", e))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer
                .write_all(&serialized)
                .map_err(|e| io_error("Failed to write snapshot", e))?;
            writer.flush().map_err(|e| io_error("Failed to flush snapshot", e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| io_error("Failed to sync snapshot", e))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| io_error("Failed to rename snapshot", e.error))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<TableSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path).map_err(|e| io_error("Failed to open snapshot", e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| io_error("Failed to read snapshot", e))?;
        let snapshot: TableSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| serialization_error("Failed to deserialize snapshot", e))?;
        if snapshot.version > SNAPSHOT_FORMAT_VERSION {
            return Err(ArchiveError::Serialization(format!(
                "snapshot format version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
    type_index: String,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        table: &str,
        type_index: &str,
        durability_mode: DurabilityMode,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(format!("{table}.wal")), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(format!("{table}.snapshot")));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
            type_index: type_index.to_string(),
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, table: &AggregateTable) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(&TableSnapshot::new(table, &self.type_index))?;
        self.wal.clear()
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.wal.set_checkpoint_threshold(threshold);
    }

    /// Snapshot first, then WAL frames in append order; later frames for a
    /// key replace earlier ones.
    pub fn recover(&mut self) -> Result<AggregateTable> {
        let mut table = match self.snapshot.load()? {
            Some(snapshot) => {
                if snapshot.metadata.type_index != self.type_index {
                    warn!(
                        "Snapshot was written for type index '{}', opening with '{}'",
                        snapshot.metadata.type_index, self.type_index
                    );
                }
                AggregateTable::from_records(snapshot.records)
            }
            None => AggregateTable::new(),
        };

        for entry in self.wal.replay()? {
            match entry {
                WalEntry::Merge { record, .. } => table.commit(record),
            }
        }
        Ok(table)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    #[cfg(test)]
    pub(crate) fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }
}
