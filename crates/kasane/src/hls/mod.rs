//! Fetch provider for HLS presentations.
//!
//! Every asset is stored in its own directory under the root:
//!
//! ```text
//! <root>/<asset id>/
//! ├── kasane.json
//! ├── video/index.m3u8, 000000_xxx.ts, ...
//! ├── audible/<option id>/index.m3u8, ...
//! └── legible/<option id>/index.m3u8, ...
//! ```
//!
//! The best variant is downloaded by every fetch. Segments found on disk are
//! not downloaded again, so later fetches of the same asset only transfer the
//! renditions they add.

mod fetch;
mod manifest;
mod state;

pub use state::{AssetState, STATE_FILE};

use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    asset::{Asset, FetchedOptions, MediaSelection, TrackGroup},
    error::{FetchFailure, KasaneError, KasaneResult},
    provider::{FetchEvent, FetchProvider, FetchRequest, TimeRange},
    util::{fs::write_atomic, http::HttpClient},
};
use manifest::Presentation;

/// Local media playlist written next to the segments of each rendition.
pub const PLAYLIST_FILE: &str = "index.m3u8";

#[derive(Clone)]
pub struct HlsFetchProvider {
    client: HttpClient,
    root: PathBuf,

    manifest_retries: u32,
    segment_retries: u32,
    concurrency: NonZeroU32,

    state_lock: Arc<Mutex<()>>,
}

impl HlsFetchProvider {
    pub fn new(client: HttpClient, root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            root: root.into(),
            manifest_retries: 3,
            segment_retries: 3,
            concurrency: NonZeroU32::MIN.saturating_add(4),
            state_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_manifest_retries(mut self, retries: u32) -> Self {
        self.manifest_retries = retries;
        self
    }

    pub fn with_segment_retries(mut self, retries: u32) -> Self {
        self.segment_retries = retries;
        self
    }

    /// Segments downloaded at the same time.
    pub fn with_concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn asset_dir(&self, asset: &Asset) -> PathBuf {
        self.root.join(asset.id.as_str())
    }

    pub async fn asset_state(&self, asset: &Asset) -> KasaneResult<AssetState> {
        AssetState::load(&self.asset_dir(asset)).await
    }

    async fn presentation(&self, asset: &Asset) -> KasaneResult<Presentation> {
        Presentation::load(&self.client, &asset.locator, self.manifest_retries)
            .await
            .map_err(|e| {
                tracing::error!("Failed to load {}: {e}", asset.locator);
                KasaneError::AssetUnreachable(asset.locator.to_string())
            })
    }

    async fn download(
        &self,
        asset: &Asset,
        presentation: &Presentation,
        selection: &MediaSelection,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> KasaneResult<PathBuf> {
        let dir = self.asset_dir(asset);

        let mut playlists = vec![(presentation.video.clone(), dir.join("video"))];
        for (characteristic, option_id) in selection.iter() {
            match presentation
                .rendition(characteristic, option_id)
                .and_then(|r| r.uri.clone())
            {
                Some(uri) => playlists.push((
                    uri,
                    dir.join(characteristic.as_str()).join(option_id),
                )),
                None => tracing::debug!("{characteristic} option {option_id} is in the video."),
            }
        }

        let mut plans = Vec::with_capacity(playlists.len());
        for (url, target) in playlists {
            let playlist =
                manifest::load_media_playlist(&self.client, &url, self.manifest_retries).await?;
            let (segments, local) = manifest::plan_segments(&url, &playlist)?;
            plans.push((target, segments, local));
        }

        let expected = TimeRange::new(
            0.,
            plans
                .iter()
                .map(|(_, segments, _)| manifest::total_duration(segments))
                .sum(),
        );
        let mut loaded = Vec::new();
        for (target, segments, local) in plans {
            tracing::info!(
                "Downloading {} segment(s) into {}.",
                segments.len(),
                target.display()
            );
            tokio::fs::create_dir_all(&target).await?;

            let mut downloads = stream::iter(segments)
                .map(|segment| {
                    let client = self.client.clone();
                    let target = target.clone();
                    let retries = self.segment_retries;
                    async move {
                        fetch::download_segment(&client, &segment, &target, retries)
                            .await
                            .map(|_| segment)
                    }
                })
                .buffer_unordered(self.concurrency.get() as usize);
            while let Some(segment) = downloads.try_next().await? {
                if segment.duration > 0. {
                    loaded.push(TimeRange::new(segment.start, segment.duration));
                    _ = events.send(FetchEvent::Progress {
                        loaded: loaded.clone(),
                        expected,
                    });
                }
            }

            let mut data = Vec::new();
            local.write_to(&mut data)?;
            write_atomic(&target.join(PLAYLIST_FILE), &data).await?;
        }

        let _guard = self.state_lock.lock().await;
        let mut state = AssetState::load(&dir).await?;
        state.locator = Some(asset.locator.clone());
        state.groups = presentation.track_groups();
        state.fetched.record(selection);
        state.save(&dir).await?;

        Ok(dir)
    }
}

impl FetchProvider for HlsFetchProvider {
    /// Falls back to the groups seen by the last fetch when the master
    /// playlist can not be loaded.
    async fn resolve_track_groups(&self, asset: &Asset) -> KasaneResult<Vec<TrackGroup>> {
        match self.presentation(asset).await {
            Ok(presentation) => Ok(presentation.track_groups()),
            Err(e) => {
                let state = self.asset_state(asset).await?;
                if state.groups.is_empty() {
                    return Err(e);
                }
                tracing::warn!("Using track groups of {} stored by the last fetch.", asset.id);
                Ok(state.groups)
            }
        }
    }

    async fn fetched_options(&self, asset: &Asset) -> KasaneResult<FetchedOptions> {
        Ok(self.asset_state(asset).await?.fetched)
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> KasaneResult<mpsc::UnboundedReceiver<FetchEvent>> {
        let presentation = self.presentation(&request.asset).await?;
        let selection = presentation.resolve_selection(&request.selection);

        let (sender, receiver) = mpsc::unbounded_channel();
        let provider = self.clone();
        tokio::spawn(async move {
            _ = sender.send(FetchEvent::SelectionResolved(selection.clone()));

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchFailure::Cancelled),
                result = provider.download(&request.asset, &presentation, &selection, &sender) => {
                    result.map_err(FetchFailure::from)
                }
            };
            _ = sender.send(FetchEvent::Finished(result));
        });

        Ok(receiver)
    }
}
