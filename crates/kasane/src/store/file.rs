use std::path::PathBuf;

use super::{ReferenceBackend, ReferenceTable};
use crate::{error::KasaneResult, util::fs};

/// References kept in a JSON document.
pub struct FileReferenceBackend {
    path: PathBuf,
}

impl FileReferenceBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ReferenceBackend for FileReferenceBackend {
    async fn read(&self) -> KasaneResult<ReferenceTable> {
        Ok(fs::read_json(&self.path).await?.unwrap_or_default())
    }

    async fn write(&self, table: &ReferenceTable) -> KasaneResult<()> {
        fs::write_json(&self.path, table).await
    }

    fn location_hint(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}
