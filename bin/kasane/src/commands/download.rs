use std::{num::NonZeroU32, path::PathBuf};

use clap::{Args, Parser};
use clap_handler::handler;
use kasane::Asset;

use crate::config::{Config, ConfigOptions};

#[derive(Parser, Clone, Debug)]
#[clap(name = "download", visible_alias = "dl")]
/// Download a stream, then every audio and subtitle track it offers
pub struct DownloadCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    #[clap(flatten)]
    pub http: HttpOptions,

    #[clap(flatten)]
    pub download: DownloadOptions,

    /// Directory name of the asset, derived from the URL by default
    #[clap(long)]
    pub id: Option<String>,

    /// URL of the master playlist
    pub url: String,
}

#[derive(Args, Clone, Debug, Default)]
pub struct HttpOptions {
    /// Additional HTTP headers
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent with every request of the stream
    #[clap(short = 'C', long = "cookie")]
    pub cookies: Vec<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Clone, Debug, Default)]
pub struct DownloadOptions {
    /// Threads limit
    #[clap(long, alias = "threads")]
    pub concurrency: Option<NonZeroU32>,

    /// Segment retry limit
    #[clap(long)]
    pub segment_retries: Option<u32>,

    /// Manifest retry limit
    #[clap(long)]
    pub manifest_retries: Option<u32>,

    /// Directory every asset is stored in
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}

impl DownloadCommand {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = self.config.load()?;

        config.http.headers.extend(self.http.headers.iter().cloned());
        if let Some(timeout) = self.http.timeout {
            config.http.timeout = timeout;
        }
        if let Some(concurrency) = self.download.concurrency {
            config.download.concurrency = concurrency;
        }
        if let Some(retries) = self.download.segment_retries {
            config.download.segment_retries = retries;
        }
        if let Some(retries) = self.download.manifest_retries {
            config.download.manifest_retries = retries;
        }
        if let Some(output) = &self.download.output {
            config.root_dir = output.clone();
        }
        Ok(config)
    }

    pub async fn download(self) -> anyhow::Result<()> {
        let config = self.config()?;
        let mut asset = Asset::parse(&self.url)?;
        if let Some(id) = self.id {
            asset = asset.with_id(id);
        }

        let mut coordinator = config.coordinator()?;
        if !self.http.cookies.is_empty() {
            coordinator
                .session()
                .provider()
                .client()
                .add_cookies(self.http.cookies.clone(), asset.locator.clone())?;
        }
        coordinator.initialize().await?;
        let pending = coordinator.session().resumed_tasks().len();
        if pending > 0 {
            tracing::info!("Continuing {pending} unfinished download(s) as well.");
        }

        tracing::info!("Downloading {} into {}.", asset.locator, config.root_dir.display());
        if let Err(e) = coordinator.download(asset).await {
            // the failed sequence is still reported
            tracing::error!("Failed to start download: {e}");
        }
        super::drive(&mut coordinator).await
    }
}

#[handler(DownloadCommand)]
pub async fn download(args: DownloadCommand) -> anyhow::Result<()> {
    args.download().await
}
