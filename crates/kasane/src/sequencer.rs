//! Decides, after each completed fetch, whether another track option has to
//! be downloaded.
//!
//! ```text
//!  Idle ──► PrimaryInFlight ──► ResolvingSelection ──► Complete
//!                 │                  ▲      │
//!                 │                  │      ▼
//!                 │             SecondaryInFlight
//!                 │                       │
//!                 └───────► Failed ◄──────┘
//! ```
//!
//! The sequencer performs no I/O. Its owner starts the fetches it asks for
//! and feeds it the session events of the tasks it owns.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    asset::{Asset, FetchedOptions, MediaSelection, TrackOption},
    catalog::TrackCatalog,
    error::{FetchFailure, KasaneError, KasaneResult},
    provider::TrackTarget,
    session::TaskId,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SequencerState {
    Idle,
    PrimaryInFlight {
        task: TaskId,
    },
    /// A fetch completed and the catalog has to be consulted.
    ResolvingSelection,
    SecondaryInFlight {
        task: TaskId,
        target: TrackTarget,
    },
    Complete,
    Failed {
        cause: FetchFailure,
    },
}

impl SequencerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }

    fn in_flight_task(&self) -> Option<TaskId> {
        match self {
            Self::PrimaryInFlight { task } | Self::SecondaryInFlight { task, .. } => Some(*task),
            _ => None,
        }
    }
}

/// What the owner of a sequencer has to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Wait for more session events.
    Wait,
    /// Build a [TrackCatalog] and pass it to [SelectionSequencer::resolve].
    Resolve,
    /// Start a fetch of `option`, layered on `base`.
    Fetch {
        target: TrackTarget,
        option: TrackOption,
        base: MediaSelection,
    },
    Complete,
    Failed(FetchFailure),
}

/// Final report of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceOutcome {
    pub asset: Asset,
    pub tasks_issued: usize,
    /// Options stored by the tasks of this sequence, kept on failure.
    pub fetched: FetchedOptions,
    pub location: Option<PathBuf>,
    pub result: Result<(), FetchFailure>,
}

pub struct SelectionSequencer {
    asset: Asset,
    state: SequencerState,

    /// Selection each task resolved, consumed when the task completes.
    selections: HashMap<TaskId, MediaSelection>,
    /// Selection of the last completed task, base of the next secondary fetch.
    base: Option<MediaSelection>,
    /// Target of the last successful secondary fetch.
    last_target: Option<TrackTarget>,

    fetched: FetchedOptions,
    location: Option<PathBuf>,
    tasks_issued: usize,
}

impl SelectionSequencer {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            state: SequencerState::Idle,
            selections: HashMap::new(),
            base: None,
            last_target: None,
            fetched: FetchedOptions::new(),
            location: None,
            tasks_issued: 0,
        }
    }

    /// Bind a sequencer to a task re-attached after a restart.
    pub fn resume(asset: Asset, task: TaskId, target: Option<TrackTarget>) -> Self {
        let mut sequencer = Self::new(asset);
        sequencer.tasks_issued = 1;
        sequencer.state = match target {
            Some(target) => SequencerState::SecondaryInFlight { task, target },
            None => SequencerState::PrimaryInFlight { task },
        };
        sequencer
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn tasks_issued(&self) -> usize {
        self.tasks_issued
    }

    pub fn location(&self) -> Option<&PathBuf> {
        self.location.as_ref()
    }

    pub fn in_flight_task(&self) -> Option<TaskId> {
        self.state.in_flight_task()
    }

    pub fn owns(&self, task: TaskId) -> bool {
        self.in_flight_task() == Some(task)
    }

    pub fn primary_started(&mut self, task: TaskId) -> KasaneResult<()> {
        if self.state != SequencerState::Idle {
            return Err(KasaneError::InvalidState("start a primary fetch"));
        }
        self.tasks_issued += 1;
        self.state = SequencerState::PrimaryInFlight { task };
        Ok(())
    }

    pub fn secondary_started(&mut self, task: TaskId, target: TrackTarget) -> KasaneResult<()> {
        if self.state != SequencerState::ResolvingSelection {
            return Err(KasaneError::InvalidState("start a secondary fetch"));
        }
        self.tasks_issued += 1;
        self.state = SequencerState::SecondaryInFlight { task, target };
        Ok(())
    }

    /// A fetch could not be started, or the catalog could not be built.
    pub fn fail(&mut self, cause: FetchFailure) -> Step {
        if !self.state.is_terminal() {
            tracing::warn!("Sequence of {} failed: {cause}", self.asset.id);
            self.state = SequencerState::Failed {
                cause: cause.clone(),
            };
        }
        self.selections.clear();
        Step::Failed(cause)
    }

    /// Record the selection a task resolved. Returns `false` when the task
    /// is not in flight for this sequencer.
    pub fn on_selection_resolved(&mut self, task: TaskId, selection: MediaSelection) -> bool {
        if !self.owns(task) {
            tracing::debug!("Ignoring selection of task {task}, not in flight.");
            return false;
        }
        self.selections.insert(task, selection);
        true
    }

    pub fn on_finished(
        &mut self,
        task: TaskId,
        result: Result<PathBuf, FetchFailure>,
    ) -> KasaneResult<Step> {
        if !self.owns(task) {
            return Err(KasaneError::UnknownTask(task));
        }

        let selection = self.selections.remove(&task);
        let location = match result {
            Ok(location) => location,
            Err(cause) => return Ok(self.fail(cause)),
        };

        if let Some(selection) = &selection {
            self.fetched.record(selection);
        }
        if let SequencerState::SecondaryInFlight { target, .. } = &self.state {
            self.fetched
                .insert(target.characteristic, target.option_id.clone());
            self.last_target = Some(target.clone());
        }

        if selection.is_none() {
            tracing::warn!(
                "Task {task} of {} finished without resolving its selection.",
                self.asset.id
            );
        }
        self.base = selection;
        self.location = Some(location);
        self.state = SequencerState::ResolvingSelection;
        Ok(Step::Resolve)
    }

    /// Consult the catalog after a completed fetch.
    pub fn resolve(&mut self, catalog: &TrackCatalog) -> KasaneResult<Step> {
        if self.state != SequencerState::ResolvingSelection {
            return Err(KasaneError::InvalidState("resolve a selection"));
        }

        let Some((group, option)) = catalog.next_missing_option() else {
            tracing::info!(
                "All tracks of {} are stored after {} task(s).",
                self.asset.id,
                self.tasks_issued
            );
            self.state = SequencerState::Complete;
            return Ok(Step::Complete);
        };

        let target = TrackTarget::new(group.characteristic, option.id.clone());
        if self.last_target.as_ref() == Some(&target) {
            // the provider reported success without storing the option,
            // fetching it again would never end
            return Ok(self.fail(FetchFailure::Storage(format!(
                "{} option {} was fetched but is not stored",
                target.characteristic, target.option_id
            ))));
        }

        let base = self
            .base
            .clone()
            .unwrap_or_else(|| catalog.default_selection());
        Ok(Step::Fetch {
            target,
            option: option.clone(),
            base,
        })
    }

    /// Report of a sequence in a terminal state.
    pub fn outcome(&self) -> Option<SequenceOutcome> {
        let result = match &self.state {
            SequencerState::Complete => Ok(()),
            SequencerState::Failed { cause } => Err(cause.clone()),
            _ => return None,
        };
        Some(SequenceOutcome {
            asset: self.asset.clone(),
            tasks_issued: self.tasks_issued,
            fetched: self.fetched.clone(),
            location: self.location.clone(),
            result,
        })
    }
}
