use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Stable identifier of a logical asset.
///
/// Derived from the locator unless the caller supplies one, and safe to use
/// as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(sanitize(&id.into()))
    }

    /// Readable host and path, followed by a digest of the whole locator.
    pub fn from_locator(locator: &Url) -> Self {
        let host = locator.host_str().unwrap_or_default();
        let readable = sanitize(&format!("{host}{}", locator.path()));
        Self(format!("{readable}-{}", short_digest(&[locator.as_str()])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First 8 hex digits of the SHA-256 of `parts`.
pub(crate) fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(8);
    digest
}

/// `raw` as a directory name, with a digest appended when sanitizing lost
/// characters, so distinct inputs keep distinct ids.
pub(crate) fn unique_id(raw: &str) -> String {
    let id = sanitize(raw);
    if id == raw {
        id
    } else {
        format!("{}-{}", id.trim_end_matches('-'), short_digest(&[raw]))
    }
}

pub(crate) fn sanitize(raw: &str) -> String {
    let mut id = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            id.push(c);
        } else if !id.ends_with('_') {
            id.push('_');
        }
    }
    let id = id.trim_matches('_');
    if id.is_empty() {
        "asset".to_string()
    } else {
        id.to_string()
    }
}

/// A remote asset to download. Immutable for the duration of a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub locator: Url,
    pub title: String,
}

impl Asset {
    pub fn new(locator: Url) -> Self {
        let title = locator
            .path_segments()
            .and_then(|mut s| s.next_back())
            .and_then(|name| name.split('.').next())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("master")
            .to_string();

        Self {
            id: AssetId::from_locator(&locator),
            locator,
            title,
        }
    }

    pub fn parse(locator: &str) -> crate::KasaneResult<Self> {
        Ok(Self::new(Url::parse(locator)?))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = AssetId::new(id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Characteristic shared by every option of a track group.
///
/// Declaration order is the resolution priority: audible before legible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCharacteristic {
    Audible,
    Legible,
}

impl MediaCharacteristic {
    pub const PRIORITY: [MediaCharacteristic; 2] = [Self::Audible, Self::Legible];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audible => "audible",
            Self::Legible => "legible",
        }
    }
}

impl fmt::Display for MediaCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaCharacteristic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audible" | "audio" => Ok(Self::Audible),
            "legible" | "subtitle" | "subtitles" => Ok(Self::Legible),
            other => Err(format!("unknown media characteristic: {other}")),
        }
    }
}

/// One selectable rendition inside a [TrackGroup].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackOption {
    /// Unique inside its group.
    pub id: String,
    pub name: String,
    pub language: Option<String>,
    pub is_default: bool,
}

impl TrackOption {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: None,
            is_default: false,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn default_option(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Mutually exclusive renditions sharing a characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackGroup {
    pub characteristic: MediaCharacteristic,
    pub options: Vec<TrackOption>,
}

impl TrackGroup {
    pub fn new(characteristic: MediaCharacteristic, options: Vec<TrackOption>) -> Self {
        Self {
            characteristic,
            options,
        }
    }

    /// The option flagged default, falling back to the first one.
    pub fn default_option(&self) -> Option<&TrackOption> {
        self.options
            .iter()
            .find(|o| o.is_default)
            .or_else(|| self.options.first())
    }

    pub fn option(&self, id: &str) -> Option<&TrackOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// The option chosen for each characteristic of a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSelection {
    selected: BTreeMap<MediaCharacteristic, String>,
}

impl MediaSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, characteristic: MediaCharacteristic, option_id: impl Into<String>) {
        self.selected.insert(characteristic, option_id.into());
    }

    /// Copy of this selection with one option forced on top of it.
    pub fn with_option(&self, characteristic: MediaCharacteristic, option_id: &str) -> Self {
        let mut selection = self.clone();
        selection.select(characteristic, option_id);
        selection
    }

    pub fn get(&self, characteristic: MediaCharacteristic) -> Option<&str> {
        self.selected.get(&characteristic).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MediaCharacteristic, &str)> {
        self.selected.iter().map(|(c, id)| (*c, id.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Options already stored locally for an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchedOptions {
    stored: BTreeMap<MediaCharacteristic, BTreeSet<String>>,
}

impl FetchedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, characteristic: MediaCharacteristic, option_id: impl Into<String>) {
        self.stored
            .entry(characteristic)
            .or_default()
            .insert(option_id.into());
    }

    /// Mark every option of a completed selection as stored.
    pub fn record(&mut self, selection: &MediaSelection) {
        for (characteristic, option_id) in selection.iter() {
            self.insert(characteristic, option_id);
        }
    }

    pub fn contains(&self, characteristic: MediaCharacteristic, option_id: &str) -> bool {
        self.stored
            .get(&characteristic)
            .is_some_and(|ids| ids.contains(option_id))
    }

    pub fn count(&self, characteristic: MediaCharacteristic) -> usize {
        self.stored.get(&characteristic).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.stored.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
