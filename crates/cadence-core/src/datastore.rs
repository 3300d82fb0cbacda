use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::task::Task;

/// File-backed task store: one JSON document per line, written atomically.
/// Opened per invocation and passed down explicitly; there is no global
/// store.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pending_path: PathBuf,
    completed_path: PathBuf,
    undo_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoEntry {
    pending: Vec<Task>,
    completed: Vec<Task>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let store = Self {
            pending_path: data_dir.join("pending.data"),
            completed_path: data_dir.join("completed.data"),
            undo_path: data_dir.join("undo.data"),
            data_dir,
        };

        for path in [&store.pending_path, &store.completed_path, &store.undo_path] {
            if !path.exists() {
                fs::write(path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(data_dir = %store.data_dir.display(), "opened datastore");
        Ok(store)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_pending(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.pending_path).context("failed to load pending.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_completed(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.completed_path).context("failed to load completed.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_pending(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.pending_path, tasks).context("failed to save pending.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_completed(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.completed_path, tasks).context("failed to save completed.data")
    }

    pub fn next_id(&self, pending: &[Task]) -> u64 {
        pending.iter().filter_map(|t| t.id).max().unwrap_or(0) + 1
    }

    #[tracing::instrument(skip(self, pending, task), fields(id = ?task.id, uuid = %task.uuid))]
    pub fn add_task(&self, mut pending: Vec<Task>, task: Task) -> anyhow::Result<Vec<Task>> {
        pending.push(task);
        pending.sort_by_key(|t| t.id.unwrap_or(u64::MAX));
        self.save_pending(&pending)?;
        Ok(pending)
    }

    #[tracing::instrument(skip(self, pending, completed))]
    pub fn push_undo_snapshot(&self, pending: &[Task], completed: &[Task]) -> anyhow::Result<()> {
        let mut entries: Vec<UndoEntry> =
            load_jsonl(&self.undo_path).context("failed to load undo.data")?;
        entries.push(UndoEntry {
            pending: pending.to_vec(),
            completed: completed.to_vec(),
        });
        save_jsonl_atomic(&self.undo_path, &entries).context("failed to save undo.data")?;
        debug!(depth = entries.len(), "pushed undo snapshot");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn pop_undo_snapshot(&self) -> anyhow::Result<Option<(Vec<Task>, Vec<Task>)>> {
        let mut entries: Vec<UndoEntry> =
            load_jsonl(&self.undo_path).context("failed to load undo.data")?;
        let Some(entry) = entries.pop() else {
            return Ok(None);
        };
        save_jsonl_atomic(&self.undo_path, &entries).context("failed to save undo.data")?;
        Ok(Some((entry.pending, entry.completed)))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
