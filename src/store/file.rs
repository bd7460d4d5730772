//! JSON Lines ledger store
//!
//! One serialized entry per line, appended and synced to disk before the
//! write is acknowledged. The store keeps the byte offset of every line so
//! pages are read with a single seek.
//!
//! A write that never completes (e.g. its future is dropped by a timeout)
//! leaves the index marked dirty. The next call rescans the file and cuts
//! off any torn trailing line, so the cached tail always matches the rows.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::LedgerEntry;
use crate::store::{check_append, LedgerStore};

/// Byte offsets of the complete lines on disk plus the cached tail
#[derive(Default)]
struct LineIndex {
    offsets: Vec<u64>,
    end: u64,
    tail: Option<LedgerEntry>,
}

struct Writer {
    file: File,
    index: LineIndex,
    dirty: bool,
}

/// Append-only JSONL file store
pub struct FileStore {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl FileStore {
    /// Open (or create) the ledger file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    LedgerError::StorageUnavailable(format!(
                        "Failed to create ledger directory: {}",
                        e
                    ))
                })?;
            }
        }

        let index = if tokio::fs::try_exists(&path).await? {
            Self::rebuild_index(&path).await?
        } else {
            LineIndex::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                LedgerError::StorageUnavailable(format!("Failed to open ledger file: {}", e))
            })?;

        info!(
            "Opened ledger file {:?} with {} entries",
            path,
            index.offsets.len()
        );

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                index,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the file, recording the offset of every entry line. A trailing
    /// line without its newline is a torn write and is truncated away.
    async fn rebuild_index(path: &Path) -> Result<LineIndex> {
        let mut reader = BufReader::new(File::open(path).await?);
        let mut index = LineIndex::default();
        let mut line = Vec::new();
        let mut offset = 0u64;
        let mut line_num = 0usize;

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).await?;
            if read == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                warn!(
                    "Truncating {} bytes of torn entry at end of {:?}",
                    read, path
                );
                let file = OpenOptions::new().write(true).open(path).await?;
                file.set_len(offset).await?;
                file.sync_data().await?;
                break;
            }

            line_num += 1;
            let start = offset;
            offset += read as u64;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let entry = Self::parse_line(&line, line_num)?;
            index.offsets.push(start);
            index.tail = Some(entry);
        }

        index.end = offset;
        Ok(index)
    }

    fn parse_line(line: &[u8], line_num: usize) -> Result<LedgerEntry> {
        serde_json::from_slice(line).map_err(|e| {
            LedgerError::Serialization(format!(
                "Failed to parse entry at line {}: {}",
                line_num, e
            ))
        })
    }

    /// Bring the index back in line with the file after an interrupted write.
    async fn recover(&self, writer: &mut Writer) -> Result<()> {
        if !writer.dirty {
            return Ok(());
        }
        // Wait out any write still in flight on the handle.
        if let Err(e) = writer.file.flush().await {
            warn!("Interrupted ledger write on {:?} failed: {}", self.path, e);
        }
        writer.index = Self::rebuild_index(&self.path).await?;
        writer.dirty = false;
        info!(
            "Recovered ledger file {:?} with {} entries",
            self.path,
            writer.index.offsets.len()
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn persist_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut writer = self.writer.lock().await;
        self.recover(&mut writer).await?;
        check_append(writer.index.tail.as_ref(), entry)?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        writer.dirty = true;
        writer.file.write_all(line.as_bytes()).await?;
        writer.file.flush().await?;
        writer.file.sync_data().await?;

        let start = writer.index.end;
        writer.index.offsets.push(start);
        writer.index.end = start + line.len() as u64;
        writer.index.tail = Some(entry.clone());
        writer.dirty = false;
        debug!("Wrote ledger entry {} to {:?}", entry.sequence, self.path);
        Ok(())
    }

    async fn load_entries(&self, cursor: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        // Hold the writer so a page never observes a half-written line.
        let mut writer = self.writer.lock().await;
        self.recover(&mut writer).await?;

        let offsets = &writer.index.offsets;
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(offsets.len());
        let wanted = limit.min(offsets.len() - start);
        let mut entries = Vec::with_capacity(wanted);
        if wanted == 0 {
            return Ok(entries);
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offsets[start])).await?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        while entries.len() < wanted {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Err(LedgerError::StorageUnavailable(format!(
                    "ledger file {:?} ended before entry {}",
                    self.path,
                    start + entries.len()
                )));
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            entries.push(Self::parse_line(&line, start + entries.len() + 1)?);
        }

        Ok(entries)
    }

    async fn load_tail(&self) -> Result<Option<LedgerEntry>> {
        let mut writer = self.writer.lock().await;
        self.recover(&mut writer).await?;
        Ok(writer.index.tail.clone())
    }

    async fn entry_count(&self) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        self.recover(&mut writer).await?;
        Ok(writer.index.offsets.len() as u64)
    }
}
