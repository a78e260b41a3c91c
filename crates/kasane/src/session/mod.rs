mod journal;
mod ordered;

pub use journal::TaskRecord;
pub use ordered::OrderedEvents;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    asset::{Asset, MediaSelection},
    error::{FetchFailure, KasaneError, KasaneResult},
    provider::{FetchEvent, FetchProvider, FetchRequest, TimeRange, TrackTarget},
};
use journal::TaskJournal;

pub type TaskId = u64;

/// Fetch task event, after the session has processed the provider's report.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Fraction in `[0, 1]`, never lower than the previous one of the task.
    Progress(f64),
    SelectionResolved(MediaSelection),
    Finished(Result<PathBuf, FetchFailure>),
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub task: TaskId,
    /// Position of this event among the events of its task, from 0.
    pub sequence: u64,
    pub event: TaskEvent,
}

/// The single event stream of a [DownloadSession].
///
/// Events of one task always arrive in the order the provider reported them,
/// so a selection resolution is never observed after the task's completion.
pub struct SessionEvents {
    inner: OrderedEvents<TaskEvent>,
}

impl SessionEvents {
    fn new(rx: mpsc::UnboundedReceiver<(TaskId, u64, TaskEvent)>) -> Self {
        Self {
            inner: OrderedEvents::new(rx),
        }
    }

    /// Next event, or `None` once the session is closed and every task has
    /// delivered its terminal event.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        let (task, sequence, event) = self.inner.next().await?;
        if event.is_terminal() {
            self.inner.retire(task);
        }
        Some(SessionEvent {
            task,
            sequence,
            event,
        })
    }
}

/// Sum of loaded durations over the expected duration, clamped to `[0, 1]`.
///
/// Providers may briefly report overlapping ranges before their final
/// report, so the raw sum can exceed 1.
pub fn progress_fraction(loaded: &[TimeRange], expected: TimeRange) -> f64 {
    if expected.duration.is_nan() || expected.duration <= 0. {
        return 0.0;
    }

    let fraction: f64 = loaded
        .iter()
        .map(|range| range.duration / expected.duration)
        .sum();
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

struct ActiveTask {
    request: FetchRequest,
    cancel: CancellationToken,
    progress: f64,
}

struct SessionShared {
    tasks: Mutex<HashMap<TaskId, ActiveTask>>,
    journal: TaskJournal,
}

impl SessionShared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, ActiveTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn records(&self) -> Vec<TaskRecord> {
        self.tasks()
            .iter()
            .map(|(id, task)| TaskRecord {
                id: *id,
                request: task.request.clone(),
            })
            .collect()
    }

    async fn sync_journal(&self) {
        if let Err(e) = self.journal.sync(|| self.records()).await {
            tracing::warn!("Failed to update task journal: {e}");
        }
    }

    fn update_progress(&self, id: TaskId, fraction: f64) -> f64 {
        match self.tasks().get_mut(&id) {
            Some(task) => {
                task.progress = task.progress.max(fraction);
                task.progress
            }
            None => fraction,
        }
    }

    async fn retire(&self, id: TaskId) {
        self.tasks().remove(&id);
        self.sync_journal().await;
    }
}

pub struct DownloadSessionBuilder {
    journal: Option<PathBuf>,
}

impl DownloadSessionBuilder {
    pub fn new() -> Self {
        Self { journal: None }
    }

    /// File recording unfinished tasks, needed to resume them after a
    /// restart.
    pub fn journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(path.into());
        self
    }

    pub fn build<P>(self, provider: P) -> DownloadSession<P>
    where
        P: FetchProvider,
    {
        DownloadSession {
            provider: Arc::new(provider),
            shared: Arc::new(SessionShared {
                tasks: Mutex::new(HashMap::new()),
                journal: TaskJournal::new(self.journal),
            }),
            next_id: AtomicU64::new(0),
            sender: None,
            resumed: Vec::new(),
            initialized: false,
        }
    }
}

impl Default for DownloadSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs fetch tasks against a [FetchProvider] and funnels their events into
/// one [SessionEvents] stream.
///
/// Each task gets its own tokio task forwarding the provider's events, so
/// slow consumers never stall a download.
pub struct DownloadSession<P>
where
    P: FetchProvider,
{
    provider: Arc<P>,
    shared: Arc<SessionShared>,
    next_id: AtomicU64,

    sender: Option<mpsc::UnboundedSender<(TaskId, u64, TaskEvent)>>,
    resumed: Vec<TaskRecord>,
    initialized: bool,
}

impl<P> DownloadSession<P>
where
    P: FetchProvider,
{
    pub fn new(provider: P) -> Self {
        DownloadSessionBuilder::new().build(provider)
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn is_available(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Open the session and re-attach every task an earlier process left
    /// unfinished.
    pub async fn initialize(&mut self) -> KasaneResult<SessionEvents> {
        if self.initialized {
            return Err(KasaneError::InvalidState("initialize a session twice"));
        }

        let records = self.shared.journal.load().await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sender = Some(sender.clone());
        self.initialized = true;

        let next_id = records.iter().map(|r| r.id + 1).max().unwrap_or(0);
        self.next_id.fetch_max(next_id, Ordering::Relaxed);

        if !records.is_empty() {
            tracing::info!("Resuming {} unfinished task(s).", records.len());
        }
        self.resumed = records.clone();
        for TaskRecord { id, request } in records {
            let cancel = CancellationToken::new();
            self.shared.tasks().insert(
                id,
                ActiveTask {
                    request: request.clone(),
                    cancel: cancel.clone(),
                    progress: 0.,
                },
            );

            tracing::info!("Re-attaching task {id} of {}.", request.asset.id);
            match self.provider.resume(request, cancel.clone()).await {
                Ok(events) => self.spawn_forwarder(id, events, cancel),
                Err(e) => {
                    tracing::error!("Failed to resume task {id}: {e}");
                    self.shared.tasks().remove(&id);
                    _ = sender.send((id, 0, TaskEvent::Finished(Err(e.into()))));
                }
            }
        }
        self.shared.sync_journal().await;

        Ok(SessionEvents::new(receiver))
    }

    /// Fetch the default presentation of `asset`.
    pub async fn start_primary(&self, asset: Asset) -> KasaneResult<TaskId> {
        self.start(FetchRequest::primary(asset)).await
    }

    /// Fetch `asset` again, forcing `target` on top of `base`.
    ///
    /// At most one task per asset and target can be in flight.
    pub async fn start_for_option(
        &self,
        asset: Asset,
        base: &MediaSelection,
        target: TrackTarget,
    ) -> KasaneResult<TaskId> {
        self.start(FetchRequest::for_option(asset, base, target))
            .await
    }

    async fn start(&self, request: FetchRequest) -> KasaneResult<TaskId> {
        if !self.is_available() {
            return Err(KasaneError::SessionUnavailable);
        }

        let cancel = CancellationToken::new();
        let id = {
            let mut tasks = self.shared.tasks();
            let in_flight = tasks.values().any(|task| {
                task.request.asset.id == request.asset.id && task.request.target == request.target
            });
            if in_flight {
                return Err(KasaneError::DuplicateFetch);
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            tasks.insert(
                id,
                ActiveTask {
                    request: request.clone(),
                    cancel: cancel.clone(),
                    progress: 0.,
                },
            );
            id
        };

        if let Err(e) = self.shared.journal.sync(|| self.shared.records()).await {
            self.shared.tasks().remove(&id);
            return Err(e);
        }

        match &request.target {
            Some(target) => tracing::info!(
                "Task {id}: fetching {} option {} of {}.",
                target.characteristic,
                target.option_id,
                request.asset.id
            ),
            None => tracing::info!("Task {id}: fetching {}.", request.asset.id),
        }

        match self.provider.fetch(request, cancel.clone()).await {
            Ok(events) => {
                self.spawn_forwarder(id, events, cancel);
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Task {id} could not start: {e}");
                self.shared.retire(id).await;
                Err(e)
            }
        }
    }

    fn spawn_forwarder(
        &self,
        id: TaskId,
        events: mpsc::UnboundedReceiver<FetchEvent>,
        cancel: CancellationToken,
    ) {
        let Some(sender) = self.sender.clone() else {
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(forward(id, events, cancel, shared, sender));
    }

    /// Cancel an active task. It still delivers a terminal
    /// [FetchFailure::Cancelled] event.
    pub fn cancel(&self, id: TaskId) -> KasaneResult<()> {
        match self.shared.tasks().get(&id) {
            Some(task) => {
                task.cancel.cancel();
                Ok(())
            }
            None => Err(KasaneError::UnknownTask(id)),
        }
    }

    /// Tasks that have not delivered their terminal event, including tasks
    /// re-attached by [Self::initialize].
    pub fn pending_tasks(&self) -> Vec<TaskRecord> {
        let mut records = self.shared.records();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Tasks found in the journal by [Self::initialize]. Each of them
    /// delivers a terminal event, even when it could not be re-attached.
    pub fn resumed_tasks(&self) -> &[TaskRecord] {
        &self.resumed
    }

    pub fn progress(&self, id: TaskId) -> Option<f64> {
        self.shared.tasks().get(&id).map(|task| task.progress)
    }

    /// Cancel every active task and refuse new ones.
    pub fn close(&mut self) {
        self.sender = None;
        for task in self.shared.tasks().values() {
            task.cancel.cancel();
        }
    }
}

async fn forward(
    id: TaskId,
    mut events: mpsc::UnboundedReceiver<FetchEvent>,
    cancel: CancellationToken,
    shared: Arc<SessionShared>,
    sender: mpsc::UnboundedSender<(TaskId, u64, TaskEvent)>,
) {
    let mut sequence = 0;
    let mut emit = |event: TaskEvent| {
        if sender.send((id, sequence, event)).is_err() {
            tracing::debug!("Event stream of the session is gone, dropping event of task {id}.");
        }
        sequence += 1;
    };

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(FetchFailure::Cancelled),
            event = events.recv() => match event {
                Some(FetchEvent::Progress { loaded, expected }) => {
                    let fraction = shared.update_progress(id, progress_fraction(&loaded, expected));
                    emit(TaskEvent::Progress(fraction));
                }
                Some(FetchEvent::SelectionResolved(selection)) => {
                    emit(TaskEvent::SelectionResolved(selection));
                }
                Some(FetchEvent::Finished(result)) => break result,
                None => {
                    break Err(FetchFailure::Network(
                        "provider closed the event stream without finishing".to_string(),
                    ))
                }
            },
        }
    };

    match &outcome {
        Ok(location) => tracing::info!("Task {id} finished: {}", location.display()),
        Err(e) => tracing::warn!("Task {id} failed: {e}"),
    }

    // release the task before announcing it, so a follow-up fetch of the
    // same option is not rejected as a duplicate
    shared.retire(id).await;
    emit(TaskEvent::Finished(outcome));
}
