use clap::Parser;
use clap_handler::handler;
use kasane::{Asset, FetchProvider, TrackCatalog};

use crate::config::ConfigOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "tracks")]
/// List the tracks a stream offers and which of them are stored
pub struct TracksCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    /// Directory name of the asset, derived from the URL by default
    #[clap(long)]
    pub id: Option<String>,

    /// URL of the master playlist
    pub url: String,
}

#[handler(TracksCommand)]
pub async fn tracks(args: TracksCommand) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let provider = config.provider()?;
    let mut asset = Asset::parse(&args.url)?;
    if let Some(id) = args.id {
        asset = asset.with_id(id);
    }

    let groups = provider.resolve_track_groups(&asset).await?;
    let fetched = provider.fetched_options(&asset).await?;
    let catalog = TrackCatalog::new(groups, fetched);

    for group in catalog.groups() {
        println!("{}:", group.characteristic);
        for option in &group.options {
            println!(
                "  {} {:<24} {:<20} {:<8} {}",
                if option.is_default { '*' } else { ' ' },
                option.id,
                option.name,
                option.language.as_deref().unwrap_or("-"),
                if catalog.is_fetched(group.characteristic, &option.id) {
                    "stored"
                } else {
                    "missing"
                }
            );
        }
    }

    let missing = catalog.missing_options().len();
    if missing > 0 {
        println!("{missing} option(s) missing.");
    }
    Ok(())
}
