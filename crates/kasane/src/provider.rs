use std::{future::Future, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    asset::{Asset, FetchedOptions, MediaCharacteristic, MediaSelection, TrackGroup},
    error::{FetchFailure, KasaneResult},
};

/// A span of media time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub duration: f64,
}

impl TimeRange {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }
}

/// What a provider reports while a fetch runs.
///
/// A provider must send [FetchEvent::SelectionResolved] before
/// [FetchEvent::Finished], and must send nothing after `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    Progress {
        loaded: Vec<TimeRange>,
        expected: TimeRange,
    },
    SelectionResolved(MediaSelection),
    Finished(Result<PathBuf, FetchFailure>),
}

/// The option a secondary fetch forces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackTarget {
    pub characteristic: MediaCharacteristic,
    pub option_id: String,
}

impl TrackTarget {
    pub fn new(characteristic: MediaCharacteristic, option_id: impl Into<String>) -> Self {
        Self {
            characteristic,
            option_id: option_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub asset: Asset,
    /// Selection to download. Characteristics left out fall back to the
    /// asset's defaults, so an empty selection is the primary fetch.
    pub selection: MediaSelection,
    /// `None` for the primary fetch.
    pub target: Option<TrackTarget>,
}

impl FetchRequest {
    pub fn primary(asset: Asset) -> Self {
        Self {
            asset,
            selection: MediaSelection::new(),
            target: None,
        }
    }

    pub fn for_option(asset: Asset, base: &MediaSelection, target: TrackTarget) -> Self {
        Self {
            asset,
            selection: base.with_option(target.characteristic, &target.option_id),
            target: Some(target),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.target.is_none()
    }
}

/// Anything able to download an asset and tell which tracks it carries.
///
/// ```text
///  ┌────────────┐  fetch(request)   ┌──────────────┐
///  │            ├──────────────────►│              │
///  │  Download  │   Progress ...    │    Fetch     │
///  │  Session   │◄──────────────────┤   Provider   │
///  │            │ SelectionResolved │              │
///  │            │◄──────────────────┤              │
///  │            │     Finished      │              │
///  │            │◄──────────────────┤              │
///  └────────────┘                   └──────────────┘
/// ```
pub trait FetchProvider: Send + Sync + 'static {
    /// Track groups the asset offers.
    fn resolve_track_groups(
        &self,
        asset: &Asset,
    ) -> impl Future<Output = KasaneResult<Vec<TrackGroup>>> + Send;

    /// Options stored locally for the asset.
    fn fetched_options(
        &self,
        asset: &Asset,
    ) -> impl Future<Output = KasaneResult<FetchedOptions>> + Send;

    /// Start a fetch.
    ///
    /// Returns once the asset is resolved. An asset that can not be resolved
    /// must fail here with [crate::KasaneError::AssetUnreachable] instead of
    /// through a `Finished` event.
    fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = KasaneResult<mpsc::UnboundedReceiver<FetchEvent>>> + Send;

    /// Continue a fetch started by an earlier process.
    fn resume(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = KasaneResult<mpsc::UnboundedReceiver<FetchEvent>>> + Send {
        self.fetch(request, cancel)
    }
}

impl<P> FetchProvider for Arc<P>
where
    P: FetchProvider,
{
    fn resolve_track_groups(
        &self,
        asset: &Asset,
    ) -> impl Future<Output = KasaneResult<Vec<TrackGroup>>> + Send {
        self.as_ref().resolve_track_groups(asset)
    }

    fn fetched_options(
        &self,
        asset: &Asset,
    ) -> impl Future<Output = KasaneResult<FetchedOptions>> + Send {
        self.as_ref().fetched_options(asset)
    }

    fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = KasaneResult<mpsc::UnboundedReceiver<FetchEvent>>> + Send {
        self.as_ref().fetch(request, cancel)
    }

    fn resume(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = KasaneResult<mpsc::UnboundedReceiver<FetchEvent>>> + Send {
        self.as_ref().resume(request, cancel)
    }
}
