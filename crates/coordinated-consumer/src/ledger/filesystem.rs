//! Filesystem-based ledger.

use anyhow::{anyhow, Context};
use event_codec::EventRecord;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LedgerTransaction, ProcessedEvent};
use crate::transaction::{LocalTransaction, Transactor};

const LEDGER_FILE: &str = "processed_events.jsonl";

/// Ledger persisted as one JSON object per line in a directory.
///
/// Commits append the staged rows and fsync before returning. The set of processed
/// event ids is loaded into memory on open.
#[derive(Debug, Clone)]
pub struct FilesystemLedger {
    path: PathBuf,
    index: Arc<Mutex<HashSet<String>>>,
}

impl FilesystemLedger {
    /// Open (or create) the ledger in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create ledger directory {}", dir.display()))?;
        let path = dir.join(LEDGER_FILE);

        let index: HashSet<String> = read_rows(&path)?
            .into_iter()
            .map(|row| row.event.id)
            .collect();
        tracing::info!(
            "Opened ledger {} with {} processed events",
            path.display(),
            index.len()
        );

        Ok(Self {
            path,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, event_id: &str) -> anyhow::Result<bool> {
        Ok(lock(&self.index)?.contains(event_id))
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(lock(&self.index)?.len())
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All committed rows in commit order.
    pub fn events(&self) -> anyhow::Result<Vec<ProcessedEvent>> {
        read_rows(&self.path)
    }
}

fn lock(index: &Mutex<HashSet<String>>) -> anyhow::Result<MutexGuard<'_, HashSet<String>>> {
    index
        .lock()
        .map_err(|_| anyhow!("filesystem ledger lock poisoned"))
}

fn read_rows(path: &Path) -> anyhow::Result<Vec<ProcessedEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open ledger {}", path.display()))?;

    let mut rows = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: ProcessedEvent = serde_json::from_str(&line)
            .with_context(|| format!("Corrupt ledger row at {}:{}", path.display(), number + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Append `buffer` and make it durable, or leave the file as it was.
fn append_rows(
    file: &mut File,
    buffer: &[u8],
    sync: impl FnOnce(&File) -> std::io::Result<()>,
) -> anyhow::Result<()> {
    let start = file.metadata()?.len();
    if let Err(e) = file.write_all(buffer).and_then(|()| sync(&*file)) {
        file.set_len(start)
            .context("Failed to truncate ledger after a failed append")?;
        return Err(e).context("Failed to append ledger rows");
    }
    Ok(())
}

impl Transactor for FilesystemLedger {
    type Transaction = FilesystemLedgerTransaction;

    fn begin(&self) -> anyhow::Result<FilesystemLedgerTransaction> {
        Ok(FilesystemLedgerTransaction {
            ledger: self.clone(),
            staged: Vec::new(),
        })
    }
}

/// Open transaction against a [`FilesystemLedger`].
#[derive(Debug)]
pub struct FilesystemLedgerTransaction {
    ledger: FilesystemLedger,
    staged: Vec<ProcessedEvent>,
}

impl LocalTransaction for FilesystemLedgerTransaction {
    fn commit(&mut self) -> anyhow::Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for row in &self.staged {
            buffer.push_str(&serde_json::to_string(row)?);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger.path)
            .with_context(|| format!("Failed to open ledger {}", self.ledger.path.display()))?;
        append_rows(&mut file, buffer.as_bytes(), File::sync_data)?;

        let mut index = lock(&self.ledger.index)?;
        for row in self.staged.drain(..) {
            index.insert(row.event.id);
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }
}

impl LedgerTransaction for FilesystemLedgerTransaction {
    fn contains(&self, event_id: &str) -> anyhow::Result<bool> {
        if self.staged.iter().any(|row| row.event.id == event_id) {
            return Ok(true);
        }
        self.ledger.contains(event_id)
    }

    fn record(&mut self, event: &EventRecord) -> anyhow::Result<()> {
        if !self.contains(&event.id)? {
            self.staged.push(ProcessedEvent::new(event));
        }
        Ok(())
    }
}
