use thiserror::Error;

use crate::{asset::AssetId, session::TaskId};

/// Cause carried by the terminal event of a failed fetch task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("asset unreachable: {0}")]
    Unreachable(String),

    #[error("cancelled")]
    Cancelled,
}

impl FetchFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<&KasaneError> for FetchFailure {
    fn from(error: &KasaneError) -> Self {
        match error {
            KasaneError::Cancelled => Self::Cancelled,
            KasaneError::FetchFailed(cause) => cause.clone(),
            KasaneError::AssetUnreachable(locator) => Self::Unreachable(locator.clone()),
            KasaneError::IOError(e) => Self::Storage(e.to_string()),
            KasaneError::JsonError(e) => Self::Storage(e.to_string()),
            e => Self::Network(e.to_string()),
        }
    }
}

impl From<KasaneError> for FetchFailure {
    fn from(error: KasaneError) -> Self {
        Self::from(&error)
    }
}

#[derive(Error, Debug)]
pub enum KasaneError {
    #[error("Download session is not initialized or has been closed")]
    SessionUnavailable,

    #[error("Asset unreachable: {0}")]
    AssetUnreachable(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(FetchFailure),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Failed to delete downloaded data: {0}")]
    DeleteFailed(std::io::Error),

    #[error("A fetch for the same track option is already in flight")]
    DuplicateFetch,

    #[error("No download of {0} is running")]
    NotDownloading(AssetId),

    #[error("Unknown fetch task: {0}")]
    UnknownTask(TaskId),

    #[error("Can not {0} in the current state")]
    InvalidState(&'static str),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Manifest fetch error")]
    ManifestFetchError,

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl From<FetchFailure> for KasaneError {
    fn from(cause: FetchFailure) -> Self {
        match cause {
            FetchFailure::Cancelled => Self::Cancelled,
            FetchFailure::Unreachable(locator) => Self::AssetUnreachable(locator),
            cause => Self::FetchFailed(cause),
        }
    }
}

pub type KasaneResult<T> = Result<T, KasaneError>;
