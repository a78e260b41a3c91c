use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
};

use crate::{
    asset::{Asset, AssetId, MediaSelection, TrackOption},
    catalog::TrackCatalog,
    error::{FetchFailure, KasaneError, KasaneResult},
    provider::{FetchProvider, TrackTarget},
    sequencer::{SelectionSequencer, SequenceOutcome, SequencerState, Step},
    session::{DownloadSession, SessionEvent, SessionEvents, TaskEvent, TaskId},
    store::{PersistedReferenceStore, ReferenceBackend},
};

/// What happened since the last call to [DownloadCoordinator::next].
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Progress {
        asset: AssetId,
        task: TaskId,
        fraction: f64,
    },
    TaskFinished {
        /// `None` for tasks no sequence owns.
        asset: Option<AssetId>,
        task: TaskId,
        result: Result<PathBuf, FetchFailure>,
    },
    SequenceFinished(SequenceOutcome),
}

/// Downloads assets with every track option, one fetch at a time per asset.
///
/// The coordinator is the only consumer of the session's events. It feeds
/// them to the sequencer owning each task, performs the fetches the
/// sequencers ask for and remembers where each asset was stored.
pub struct DownloadCoordinator<P, B>
where
    P: FetchProvider,
    B: ReferenceBackend,
{
    session: DownloadSession<P>,
    events: Option<SessionEvents>,
    store: PersistedReferenceStore<B>,

    sequencers: HashMap<AssetId, SelectionSequencer>,
    owners: HashMap<TaskId, AssetId>,
    reports: VecDeque<Report>,
}

impl<P, B> DownloadCoordinator<P, B>
where
    P: FetchProvider,
    B: ReferenceBackend,
{
    pub fn new(session: DownloadSession<P>, store: PersistedReferenceStore<B>) -> Self {
        Self {
            session,
            events: None,
            store,
            sequencers: HashMap::new(),
            owners: HashMap::new(),
            reports: VecDeque::new(),
        }
    }

    pub fn session(&self) -> &DownloadSession<P> {
        &self.session
    }

    pub fn store(&self) -> &PersistedReferenceStore<B> {
        &self.store
    }

    /// Open the session and continue every sequence an earlier process left
    /// unfinished.
    pub async fn initialize(&mut self) -> KasaneResult<()> {
        self.events = Some(self.session.initialize().await?);

        for record in self.session.resumed_tasks().to_vec() {
            let asset = record.request.asset;
            if self.sequencers.contains_key(&asset.id) {
                tracing::warn!(
                    "Task {} of {} has no sequence to continue, the asset has another task.",
                    record.id,
                    asset.id
                );
                continue;
            }

            self.owners.insert(record.id, asset.id.clone());
            self.sequencers.insert(
                asset.id.clone(),
                SelectionSequencer::resume(asset, record.id, record.request.target),
            );
        }
        Ok(())
    }

    /// Start downloading `asset`, its default presentation first.
    ///
    /// Only one sequence per asset runs at a time. When the first fetch can
    /// not start, the failed sequence is reported as well.
    pub async fn download(&mut self, asset: Asset) -> KasaneResult<TaskId> {
        if self.sequencers.contains_key(&asset.id) {
            return Err(KasaneError::DuplicateFetch);
        }

        let mut sequencer = SelectionSequencer::new(asset.clone());
        let task = match self.session.start_primary(asset).await {
            Ok(task) => task,
            Err(e) => {
                if !matches!(
                    e,
                    KasaneError::SessionUnavailable | KasaneError::DuplicateFetch
                ) {
                    sequencer.fail(FetchFailure::from(&e));
                    if let Some(outcome) = sequencer.outcome() {
                        self.reports.push_back(Report::SequenceFinished(outcome));
                    }
                }
                return Err(e);
            }
        };
        sequencer.primary_started(task)?;

        let id = sequencer.asset().id.clone();
        self.owners.insert(task, id.clone());
        self.sequencers.insert(id, sequencer);
        Ok(task)
    }

    /// Cancel the running fetch of `asset`, which fails its sequence.
    pub fn cancel(&self, asset: &AssetId) -> KasaneResult<()> {
        let task = self
            .sequencers
            .get(asset)
            .and_then(SelectionSequencer::in_flight_task)
            .ok_or_else(|| KasaneError::NotDownloading(asset.clone()))?;
        self.session.cancel(task)
    }

    pub fn state(&self, asset: &AssetId) -> Option<&SequencerState> {
        self.sequencers.get(asset).map(SelectionSequencer::state)
    }

    pub fn is_idle(&self) -> bool {
        self.sequencers.is_empty() && self.reports.is_empty()
    }

    /// Cancel every running fetch. Their sequences are still reported.
    pub fn close(&mut self) {
        self.session.close();
    }

    /// Next report, or `None` once no sequence is running.
    pub async fn next(&mut self) -> Option<Report> {
        loop {
            if let Some(report) = self.reports.pop_front() {
                return Some(report);
            }
            if self.sequencers.is_empty() {
                return None;
            }

            let event = self.events.as_mut()?.next().await?;
            self.handle(event).await;
        }
    }

    /// Drive every running sequence to its end.
    pub async fn run_until_idle(&mut self) -> Vec<SequenceOutcome> {
        let mut outcomes = Vec::new();
        while let Some(report) = self.next().await {
            if let Report::SequenceFinished(outcome) = report {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn handle(&mut self, SessionEvent { task, event, .. }: SessionEvent) {
        let Some(asset) = self.owners.get(&task).cloned() else {
            match event {
                TaskEvent::Finished(result) => self.reports.push_back(Report::TaskFinished {
                    asset: None,
                    task,
                    result,
                }),
                _ => tracing::debug!("Dropping event of task {task}, no sequence owns it."),
            }
            return;
        };

        match event {
            TaskEvent::Progress(fraction) => self.reports.push_back(Report::Progress {
                asset,
                task,
                fraction,
            }),
            TaskEvent::SelectionResolved(selection) => {
                if let Some(sequencer) = self.sequencers.get_mut(&asset) {
                    sequencer.on_selection_resolved(task, selection);
                }
            }
            TaskEvent::Finished(result) => {
                self.owners.remove(&task);
                self.reports.push_back(Report::TaskFinished {
                    asset: Some(asset.clone()),
                    task,
                    result: result.clone(),
                });
                self.on_finished(&asset, task, result).await;
            }
        }
    }

    async fn on_finished(
        &mut self,
        asset: &AssetId,
        task: TaskId,
        result: Result<PathBuf, FetchFailure>,
    ) {
        let Some(sequencer) = self.sequencers.get_mut(asset) else {
            return;
        };

        let primary = matches!(sequencer.state(), SequencerState::PrimaryInFlight { .. });
        let mut step = match sequencer.on_finished(task, result) {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!("Ignoring completion of task {task}: {e}");
                return;
            }
        };

        if primary && step == Step::Resolve {
            if let Some(location) = sequencer.location().cloned() {
                if let Err(e) = self.store.save(asset, &location).await {
                    step = sequencer.fail(FetchFailure::Storage(e.to_string()));
                }
            }
        }

        self.drive(asset, step).await;
    }

    async fn drive(&mut self, asset: &AssetId, mut step: Step) {
        loop {
            step = match step {
                Step::Wait => return,
                Step::Resolve => self.resolve(asset).await,
                Step::Fetch {
                    target,
                    option,
                    base,
                } => self.start_secondary(asset, target, option, base).await,
                Step::Complete | Step::Failed(_) => {
                    self.finish(asset).await;
                    return;
                }
            };
        }
    }

    async fn resolve(&mut self, asset: &AssetId) -> Step {
        let Some(sequencer) = self.sequencers.get_mut(asset) else {
            return Step::Wait;
        };

        let provider = self.session.provider();
        let catalog = async {
            let groups = provider.resolve_track_groups(sequencer.asset()).await?;
            let fetched = provider.fetched_options(sequencer.asset()).await?;
            KasaneResult::Ok(TrackCatalog::new(groups, fetched))
        }
        .await;

        match catalog.and_then(|catalog| sequencer.resolve(&catalog)) {
            Ok(step) => step,
            Err(e) => sequencer.fail(e.into()),
        }
    }

    async fn start_secondary(
        &mut self,
        asset: &AssetId,
        target: TrackTarget,
        option: TrackOption,
        base: MediaSelection,
    ) -> Step {
        let Some(sequencer) = self.sequencers.get_mut(asset) else {
            return Step::Wait;
        };

        tracing::info!(
            "{asset} is missing {} option {} ({}).",
            target.characteristic,
            option.id,
            option.name
        );
        let task = match self
            .session
            .start_for_option(sequencer.asset().clone(), &base, target.clone())
            .await
        {
            Ok(task) => task,
            Err(e) => return sequencer.fail(e.into()),
        };

        match sequencer.secondary_started(task, target) {
            Ok(()) => {
                self.owners.insert(task, asset.clone());
                Step::Wait
            }
            Err(e) => {
                _ = self.session.cancel(task);
                sequencer.fail(e.into())
            }
        }
    }

    async fn finish(&mut self, asset: &AssetId) {
        let Some(sequencer) = self.sequencers.remove(asset) else {
            return;
        };
        let Some(outcome) = sequencer.outcome() else {
            return;
        };

        if let (Ok(()), Some(location)) = (&outcome.result, &outcome.location) {
            let saved = self.store.load_asset(asset).await.ok().flatten();
            if saved.as_ref() != Some(location) {
                if let Err(e) = self.store.save(asset, location).await {
                    tracing::error!("Failed to save location of {asset}: {e}");
                }
            }
        }

        match &outcome.result {
            Ok(()) => tracing::info!(
                "Downloaded {asset} with {} task(s).",
                outcome.tasks_issued
            ),
            Err(e) => tracing::warn!(
                "Download of {asset} stopped after {} task(s): {e}",
                outcome.tasks_issued
            ),
        }
        self.reports.push_back(Report::SequenceFinished(outcome));
    }
}
