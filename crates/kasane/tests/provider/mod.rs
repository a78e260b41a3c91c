use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use kasane::{
    Asset, FetchEvent, FetchFailure, FetchProvider, FetchRequest, FetchedOptions, KasaneError,
    KasaneResult, MediaCharacteristic, MediaSelection, TimeRange, TrackGroup, TrackOption,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Succeed,
    /// `fetch` itself fails.
    Unreachable,
    /// The fetch starts and reports this failure.
    Fail(FetchFailure),
    /// Never finishes, even when cancelled.
    Hang,
    /// Closes the event stream without a terminal event.
    Vanish,
    /// Reports success without storing the forced option.
    ForgetTarget,
}

/// Provider following a script instead of downloading anything.
pub struct TestProvider {
    groups: Vec<TrackGroup>,
    root: PathBuf,
    behavior: Mutex<Behavior>,
    stored: Arc<Mutex<FetchedOptions>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl TestProvider {
    pub fn new(root: impl Into<PathBuf>, behavior: Behavior) -> Self {
        Self::with_groups(
            root,
            behavior,
            vec![
                TrackGroup::new(
                    MediaCharacteristic::Audible,
                    vec![
                        TrackOption::new("a-default", "Audio").default_option(),
                        TrackOption::new("a-alt", "Commentary"),
                    ],
                ),
                TrackGroup::new(
                    MediaCharacteristic::Legible,
                    vec![TrackOption::new("s-default", "Subtitles").default_option()],
                ),
            ],
        )
    }

    pub fn with_groups(
        root: impl Into<PathBuf>,
        behavior: Behavior,
        groups: Vec<TrackGroup>,
    ) -> Self {
        Self {
            groups,
            root: root.into(),
            behavior: Mutex::new(behavior),
            stored: Arc::new(Mutex::new(FetchedOptions::new())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stored(&self) -> FetchedOptions {
        self.stored.lock().unwrap().clone()
    }

    fn resolve(&self, requested: &MediaSelection) -> MediaSelection {
        let mut selection = MediaSelection::new();
        for group in &self.groups {
            let option = requested
                .get(group.characteristic)
                .and_then(|id| group.option(id))
                .or_else(|| group.default_option())
                .unwrap();
            selection.select(group.characteristic, option.id.clone());
        }
        selection
    }
}

impl FetchProvider for TestProvider {
    async fn resolve_track_groups(&self, _asset: &Asset) -> KasaneResult<Vec<TrackGroup>> {
        Ok(self.groups.clone())
    }

    async fn fetched_options(&self, _asset: &Asset) -> KasaneResult<FetchedOptions> {
        Ok(self.stored())
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        _cancel: CancellationToken,
    ) -> KasaneResult<mpsc::UnboundedReceiver<FetchEvent>> {
        let behavior = self.behavior.lock().unwrap().clone();
        if behavior == Behavior::Unreachable {
            return Err(KasaneError::AssetUnreachable(request.asset.locator.to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());

        let selection = self.resolve(&request.selection);
        let location = self.root.join(request.asset.id.as_str());
        let stored = self.stored.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let expected = TimeRange::new(0., 10.);
            _ = tx.send(FetchEvent::SelectionResolved(selection.clone()));
            // overlapping and shrinking reports
            for loaded in [
                vec![TimeRange::new(0., 6.)],
                vec![TimeRange::new(0., 6.), TimeRange::new(4., 6.)],
                vec![TimeRange::new(0., 6.)],
            ] {
                _ = tx.send(FetchEvent::Progress { loaded, expected });
            }

            let result = match behavior {
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    return;
                }
                Behavior::Vanish => return,
                Behavior::Fail(cause) => Err(cause),
                Behavior::ForgetTarget => {
                    let mut kept = MediaSelection::new();
                    for (characteristic, id) in selection.iter() {
                        if request.target.as_ref().map(|t| t.characteristic)
                            != Some(characteristic)
                        {
                            kept.select(characteristic, id);
                        }
                    }
                    stored.lock().unwrap().record(&kept);
                    Ok(location)
                }
                Behavior::Succeed | Behavior::Unreachable => {
                    stored.lock().unwrap().record(&selection);
                    Ok(location)
                }
            };
            _ = tx.send(FetchEvent::Finished(result));
        });

        Ok(rx)
    }
}

pub fn asset() -> Asset {
    Asset::parse("https://example.com/movie/master.m3u8")
        .unwrap()
        .with_id("movie")
}
