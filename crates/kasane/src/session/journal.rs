use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::TaskId;
use crate::{error::KasaneResult, provider::FetchRequest, util::fs};

/// A task that was started and has not delivered its terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub request: FetchRequest,
}

/// Durable list of non-terminal tasks, rewritten after every change.
///
/// Without a path the journal only lives in memory and nothing is resumed
/// by the next process.
pub(crate) struct TaskJournal {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TaskJournal {
    pub(crate) fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn load(&self) -> KasaneResult<Vec<TaskRecord>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        let mut records: Vec<TaskRecord> = fs::read_json(path).await?.unwrap_or_default();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    /// Persist the records produced by `snapshot`.
    ///
    /// The snapshot is taken while holding the write lock, so concurrent
    /// callers can not overwrite a newer state with an older one.
    pub(crate) async fn sync<F>(&self, snapshot: F) -> KasaneResult<()>
    where
        F: FnOnce() -> Vec<TaskRecord>,
    {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut records = snapshot();
        records.sort_by_key(|r| r.id);
        fs::write_json(path, &records).await
    }
}
