use std::sync::{Arc, Mutex};

use super::{ReferenceBackend, ReferenceTable};
use crate::error::KasaneResult;

/// References that live as long as the process. Clones share the table.
#[derive(Clone, Default)]
pub struct MemoryReferenceBackend {
    table: Arc<Mutex<ReferenceTable>>,
}

impl MemoryReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReferenceTable {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ReferenceBackend for MemoryReferenceBackend {
    async fn read(&self) -> KasaneResult<ReferenceTable> {
        Ok(self.snapshot())
    }

    async fn write(&self, table: &ReferenceTable) -> KasaneResult<()> {
        *self.table.lock().unwrap_or_else(|e| e.into_inner()) = table.clone();
        Ok(())
    }
}
