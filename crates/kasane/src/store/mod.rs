pub mod file;
pub mod memory;

use std::{
    collections::BTreeMap,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    asset::AssetId,
    error::{KasaneError, KasaneResult},
    util::fs::remove_path,
};

/// Slot used by every asset under [SlotKeying::Single].
pub const GLOBAL_SLOT: &str = "asset_path";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedReference {
    pub asset: AssetId,
    /// Relative to the root directory of the store, unless the data lives
    /// outside of it.
    pub path: PathBuf,
    pub saved_at: DateTime<Utc>,
}

/// Everything a [ReferenceBackend] persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTable {
    pub entries: BTreeMap<String, PersistedReference>,
    /// Slot written most recently.
    pub latest: Option<String>,
}

/// Durable key-value storage of a [ReferenceTable].
pub trait ReferenceBackend: Send + Sync + 'static {
    fn read(&self) -> impl Future<Output = KasaneResult<ReferenceTable>> + Send;

    fn write(&self, table: &ReferenceTable) -> impl Future<Output = KasaneResult<()>> + Send;

    /// Hint where the references are kept.
    fn location_hint(&self) -> Option<String> {
        None
    }
}

impl<B> ReferenceBackend for Arc<B>
where
    B: ReferenceBackend,
{
    fn read(&self) -> impl Future<Output = KasaneResult<ReferenceTable>> + Send {
        self.as_ref().read()
    }

    fn write(&self, table: &ReferenceTable) -> impl Future<Output = KasaneResult<()>> + Send {
        self.as_ref().write(table)
    }

    fn location_hint(&self) -> Option<String> {
        self.as_ref().location_hint()
    }
}

pub enum ReferenceStorage {
    Memory(memory::MemoryReferenceBackend),
    File(file::FileReferenceBackend),
}

impl ReferenceStorage {
    pub fn memory() -> Self {
        Self::Memory(memory::MemoryReferenceBackend::new())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(file::FileReferenceBackend::new(path.into()))
    }
}

impl ReferenceBackend for ReferenceStorage {
    async fn read(&self) -> KasaneResult<ReferenceTable> {
        match self {
            Self::Memory(backend) => backend.read().await,
            Self::File(backend) => backend.read().await,
        }
    }

    async fn write(&self, table: &ReferenceTable) -> KasaneResult<()> {
        match self {
            Self::Memory(backend) => backend.write(table).await,
            Self::File(backend) => backend.write(table).await,
        }
    }

    fn location_hint(&self) -> Option<String> {
        match self {
            Self::Memory(backend) => backend.location_hint(),
            Self::File(backend) => backend.location_hint(),
        }
    }
}

/// How references map to slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotKeying {
    /// One slot shared by every asset: saving an asset replaces the previous
    /// one.
    #[default]
    Single,
    /// One slot per asset id.
    PerAsset,
}

/// What `clear` does when the downloaded data can not be removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClearPolicy {
    /// Drop the reference anyway and report [KasaneError::DeleteFailed].
    #[default]
    BestEffort,
    /// Keep the reference until the data is gone.
    Strict,
}

/// Remembers where downloaded assets live so a later process can play them.
pub struct PersistedReferenceStore<B> {
    backend: B,
    root: PathBuf,
    keying: SlotKeying,
    policy: ClearPolicy,

    // serializes read-modify-write of the backend
    lock: Mutex<()>,
}

impl<B> PersistedReferenceStore<B>
where
    B: ReferenceBackend,
{
    /// Locations are stored relative to `root`.
    pub fn new(backend: B, root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            root: root.into(),
            keying: SlotKeying::default(),
            policy: ClearPolicy::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_keying(mut self, keying: SlotKeying) -> Self {
        self.keying = keying;
        self
    }

    pub fn with_clear_policy(mut self, policy: ClearPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn slot(&self, asset: &AssetId) -> String {
        match self.keying {
            SlotKeying::Single => GLOBAL_SLOT.to_string(),
            SlotKeying::PerAsset => asset.as_str().to_string(),
        }
    }

    fn resolve(&self, reference: &PersistedReference) -> PathBuf {
        // joining an absolute path yields it unchanged
        self.root.join(&reference.path)
    }

    /// Record `location` as the downloaded data of `asset`, replacing what
    /// the slot held.
    pub async fn save(&self, asset: &AssetId, location: &Path) -> KasaneResult<()> {
        let path = location
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| location.to_path_buf());

        let _guard = self.lock.lock().await;
        let mut table = self.backend.read().await?;
        let slot = self.slot(asset);
        table.entries.insert(
            slot.clone(),
            PersistedReference {
                asset: asset.clone(),
                path,
                saved_at: Utc::now(),
            },
        );
        table.latest = Some(slot);
        self.backend.write(&table).await?;

        tracing::info!("Saved location of {asset}: {}", location.display());
        Ok(())
    }

    /// Location of the most recently saved asset.
    pub async fn load(&self) -> KasaneResult<Option<PathBuf>> {
        let table = self.backend.read().await?;
        Ok(table
            .latest
            .as_ref()
            .and_then(|slot| table.entries.get(slot))
            .map(|reference| self.resolve(reference)))
    }

    pub async fn load_asset(&self, asset: &AssetId) -> KasaneResult<Option<PathBuf>> {
        Ok(self.reference(asset).await?.map(|r| self.resolve(&r)))
    }

    pub async fn reference(&self, asset: &AssetId) -> KasaneResult<Option<PersistedReference>> {
        let mut table = self.backend.read().await?;
        Ok(table
            .entries
            .remove(&self.slot(asset))
            .filter(|reference| &reference.asset == asset))
    }

    pub async fn references(&self) -> KasaneResult<Vec<PersistedReference>> {
        let table = self.backend.read().await?;
        Ok(table.entries.into_values().collect())
    }

    /// Location of the most recently saved asset, if its data is still on
    /// disk.
    pub async fn load_playable(&self) -> KasaneResult<Option<PathBuf>> {
        Ok(self.load().await?.filter(|path| path.exists()))
    }

    /// Remove the most recently saved asset and its data.
    ///
    /// A store without references is cleared successfully.
    pub async fn clear(&self) -> KasaneResult<()> {
        let _guard = self.lock.lock().await;
        let table = self.backend.read().await?;
        match table.latest.clone() {
            Some(slot) => self.clear_slot(table, &slot).await,
            None => Ok(()),
        }
    }

    pub async fn clear_asset(&self, asset: &AssetId) -> KasaneResult<()> {
        let _guard = self.lock.lock().await;
        let table = self.backend.read().await?;
        let slot = self.slot(asset);
        match table.entries.get(&slot) {
            Some(reference) if &reference.asset == asset => self.clear_slot(table, &slot).await,
            _ => Ok(()),
        }
    }

    async fn clear_slot(&self, mut table: ReferenceTable, slot: &str) -> KasaneResult<()> {
        let Some(reference) = table.entries.get(slot) else {
            return Ok(());
        };

        let location = self.resolve(reference);
        let removed = remove_path(&location).await;
        if let Err(e) = &removed {
            tracing::error!("Failed to delete {}: {e}", location.display());
        }
        if removed.is_err() && self.policy == ClearPolicy::Strict {
            return removed.map_err(KasaneError::DeleteFailed);
        }

        table.entries.remove(slot);
        if table.latest.as_deref() == Some(slot) {
            table.latest = table
                .entries
                .iter()
                .max_by_key(|(_, reference)| reference.saved_at)
                .map(|(slot, _)| slot.clone());
        }
        self.backend.write(&table).await?;

        removed.map_err(KasaneError::DeleteFailed)
    }
}
