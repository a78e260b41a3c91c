use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use clap::Args;
use fake_user_agent::get_chrome_rua;
use kasane::{
    hls::HlsFetchProvider, util::http::HttpClient, ClearPolicy, DownloadCoordinator,
    DownloadSessionBuilder, PersistedReferenceStore, ReferenceStorage, SlotKeying,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use serde::{Deserialize, Serialize};

pub type Coordinator = DownloadCoordinator<HlsFetchProvider, ReferenceStorage>;

const DEFAULT_CONFIG: &str = "kasane.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Directory every asset is stored in
    pub root_dir: PathBuf,
    /// Defaults to `.kasane/journal.json` under the root directory
    pub journal: Option<PathBuf>,
    /// Defaults to `.kasane/references.json` under the root directory
    pub references: Option<PathBuf>,
    pub keying: SlotKeying,
    pub clear_policy: ClearPolicy,
    pub http: HttpConfig,
    pub download: DownloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("downloads"),
            journal: None,
            references: None,
            keying: SlotKeying::default(),
            clear_policy: ClearPolicy::default(),
            http: HttpConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    /// HTTP timeout, in seconds
    pub timeout: u64,
    /// Additional headers, as `Name: value`
    pub headers: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DownloadConfig {
    pub concurrency: NonZeroU32,
    pub segment_retries: u32,
    pub manifest_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: NonZeroU32::MIN.saturating_add(4),
            segment_retries: 3,
            manifest_retries: 3,
        }
    }
}

impl Config {
    /// Read `path`, or `kasane.toml` in the working directory when it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG).exists() => Path::new(DEFAULT_CONFIG),
            None => return Ok(Self::default()),
        };
        let data = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal
            .clone()
            .unwrap_or_else(|| self.root_dir.join(".kasane").join("journal.json"))
    }

    pub fn references_path(&self) -> PathBuf {
        self.references
            .clone()
            .unwrap_or_else(|| self.root_dir.join(".kasane").join("references.json"))
    }

    pub fn client(&self) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        for header in &self.http.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim())?,
                HeaderValue::from_str(value.trim())?,
            );
        }

        let builder = Client::builder()
            .default_headers(headers)
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.http.timeout));
        Ok(HttpClient::new(builder)?)
    }

    pub fn provider(&self) -> anyhow::Result<HlsFetchProvider> {
        Ok(HlsFetchProvider::new(self.client()?, &self.root_dir)
            .with_concurrency(self.download.concurrency)
            .with_segment_retries(self.download.segment_retries)
            .with_manifest_retries(self.download.manifest_retries))
    }

    pub fn store(&self) -> PersistedReferenceStore<ReferenceStorage> {
        PersistedReferenceStore::new(
            ReferenceStorage::file(self.references_path()),
            &self.root_dir,
        )
        .with_keying(self.keying)
        .with_clear_policy(self.clear_policy)
    }

    pub fn coordinator(&self) -> anyhow::Result<Coordinator> {
        let session = DownloadSessionBuilder::new()
            .journal(self.journal_path())
            .build(self.provider()?);
        Ok(DownloadCoordinator::new(session, self.store()))
    }
}

/// Options shared by every command
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOptions {
    /// Configuration file
    #[clap(short, long, env = "KASANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory every asset is stored in
    #[clap(long)]
    pub root_dir: Option<PathBuf>,

    /// Keep one reference per asset instead of only the latest one
    #[clap(long)]
    pub per_asset: bool,
}

impl ConfigOptions {
    pub fn load(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(root_dir) = &self.root_dir {
            config.root_dir = root_dir.clone();
        }
        if self.per_asset {
            config.keying = SlotKeying::PerAsset;
        }
        Ok(config)
    }
}
