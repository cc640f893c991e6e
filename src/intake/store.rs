use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::routing::Target;

use super::unit::OutcomeStatus;

// -----------------------------------------------------------------------------
// ----- OutcomeRecord ---------------------------------------------------------

/// Durable form of a [`PendingOutcome`](super::PendingOutcome). The document
/// body is not persisted; its md5 hex digest and length identify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub document_id: String,
    pub target: Option<Target>,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub payload_digest: String,
    pub payload_len: usize,
}

// -----------------------------------------------------------------------------
// ----- OutcomeStore ----------------------------------------------------------

#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persists one committed batch. Either the whole batch is durable when
    /// this returns `Ok`, or the commit must be treated as failed.
    async fn append_batch(&self, tid: &str, outcomes: &[OutcomeRecord]) -> io::Result<()>;

    async fn has_committed(&self, tid: &str) -> io::Result<bool>;
}

// -----------------------------------------------------------------------------
// ----- MemoryOutcomeStore ----------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    batches: Mutex<HashMap<String, Vec<Vec<OutcomeRecord>>>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch written for `tid`, oldest first.
    pub fn batches(&self, tid: &str) -> Vec<Vec<OutcomeRecord>> {
        self.batches.lock().get(tid).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn append_batch(&self, tid: &str, outcomes: &[OutcomeRecord]) -> io::Result<()> {
        self.batches
            .lock()
            .entry(tid.to_string())
            .or_default()
            .push(outcomes.to_vec());
        Ok(())
    }

    async fn has_committed(&self, tid: &str) -> io::Result<bool> {
        Ok(self.batches.lock().contains_key(tid))
    }
}

// -----------------------------------------------------------------------------
// ----- JournalOutcomeStore ---------------------------------------------------

/// Append-only JSON-lines journal, one line per committed batch, synced to
/// disk before `append_batch` returns.
#[derive(Debug)]
pub struct JournalOutcomeStore {
    path: PathBuf,
    file: tokio::sync::Mutex<JournalFile>,
    committed: RwLock<HashSet<String>>,
}

// Append handle plus the length of the journal's last complete line.
#[derive(Debug)]
struct JournalFile {
    file: File,
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    tid: String,
    committed_at: u64,
    outcomes: Vec<OutcomeRecord>,
}

impl JournalOutcomeStore {
    /// Opens or creates the journal at `path` and replays it to learn which
    /// tids were committed. A torn final line from an interrupted write is
    /// cut off; corruption anywhere else is an error.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (committed, tail) = match fs::read_to_string(&path).await {
            Ok(raw) => replay(&path, &raw)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => (HashSet::new(), Tail::Clean),
            Err(e) => return Err(e),
        };

        if let Tail::Torn { keep } = tail {
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(keep).await?;
            file.sync_all().await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if tail == Tail::Unterminated {
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }
        let len = file.metadata().await?.len();

        info!(path = %path.display(), committed = committed.len(), "opened outcome journal");

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(JournalFile { file, len }),
            committed: RwLock::new(committed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn committed_count(&self) -> usize {
        self.committed.read().len()
    }
}

#[async_trait]
impl OutcomeStore for JournalOutcomeStore {
    async fn append_batch(&self, tid: &str, outcomes: &[OutcomeRecord]) -> io::Result<()> {
        let line = JournalLine {
            tid: tid.to_string(),
            committed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            outcomes: outcomes.to_vec(),
        };

        let mut bytes = serde_json::to_vec(&line).map_err(io::Error::other)?;
        bytes.push(b'\n');

        self.file.lock().await.append(&bytes).await?;

        self.committed.write().insert(line.tid);
        Ok(())
    }

    async fn has_committed(&self, tid: &str) -> io::Result<bool> {
        Ok(self.committed.read().contains(tid))
    }
}

impl JournalFile {
    /// Appends one whole line or nothing: a failed write is cut back off, and
    /// any bytes a previous failure left behind are dropped first.
    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.file.metadata().await?.len() != self.len {
            warn!(keep = self.len, "trimming partial journal write");
            self.file.set_len(self.len).await?;
        }

        let written = match self.file.write_all(bytes).await {
            Ok(()) => self.file.sync_data().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(trim) = self.file.set_len(self.len).await {
                warn!(error = %trim, "could not trim failed journal write");
            }
            return Err(e);
        }

        self.len += bytes.len() as u64;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    // Last entry is whole but lacks its newline.
    Unterminated,
    // Last entry is partial; the file is cut back to `keep` bytes.
    Torn { keep: u64 },
}

fn replay(path: &Path, raw: &str) -> io::Result<(HashSet<String>, Tail)> {
    let mut committed = HashSet::new();
    let complete = raw.is_empty() || raw.ends_with('\n');
    let lines: Vec<&str> = raw.lines().collect();
    let mut tail = if complete { Tail::Clean } else { Tail::Unterminated };

    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JournalLine>(line) {
            Ok(entry) => {
                committed.insert(entry.tid);
            }
            Err(e) if idx + 1 == lines.len() && !complete => {
                warn!(path = %path.display(), error = %e, "discarding torn journal tail");
                let keep = raw.rfind('\n').map_or(0, |pos| pos + 1);
                tail = Tail::Torn { keep: keep as u64 };
            }
            Err(e) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}:{}: {e}", path.display(), idx + 1),
                ));
            }
        }
    }

    Ok((committed, tail))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
