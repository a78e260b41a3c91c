pub mod asset;
pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod hls;
pub mod provider;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod util;

pub use asset::{
    Asset, AssetId, FetchedOptions, MediaCharacteristic, MediaSelection, TrackGroup, TrackOption,
};
pub use catalog::TrackCatalog;
pub use coordinator::{DownloadCoordinator, Report};
pub use error::{FetchFailure, KasaneError, KasaneResult};
pub use provider::{FetchEvent, FetchProvider, FetchRequest, TimeRange, TrackTarget};
pub use sequencer::{SelectionSequencer, SequenceOutcome, SequencerState, Step};
pub use session::{DownloadSession, DownloadSessionBuilder, SessionEvent, TaskEvent, TaskId};
pub use store::{ClearPolicy, PersistedReferenceStore, ReferenceStorage, SlotKeying};
