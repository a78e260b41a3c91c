use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    asset::{FetchedOptions, TrackGroup},
    error::KasaneResult,
    util::fs,
};

pub const STATE_FILE: &str = "kasane.json";

/// What is stored in the directory of one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetState {
    pub locator: Option<Url>,
    /// Track groups seen the last time the master playlist was loaded.
    #[serde(default)]
    pub groups: Vec<TrackGroup>,
    #[serde(default)]
    pub fetched: FetchedOptions,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AssetState {
    fn path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    pub async fn load(dir: &Path) -> KasaneResult<Self> {
        Ok(fs::read_json(&Self::path(dir)).await?.unwrap_or_default())
    }

    pub async fn save(&mut self, dir: &Path) -> KasaneResult<()> {
        self.updated_at = Some(Utc::now());
        fs::write_json(&Self::path(dir), self).await
    }
}
