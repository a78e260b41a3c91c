use clap::Parser;
use clap_handler::handler;
use kasane::AssetId;

use crate::config::ConfigOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "locate")]
/// Print where a downloaded asset is stored
pub struct LocateCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    /// Asset to locate, the most recent download by default
    pub id: Option<String>,
}

#[handler(LocateCommand)]
pub async fn locate(args: LocateCommand) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let store = config.store();

    let location = match &args.id {
        Some(id) => store.load_asset(&AssetId::new(id.as_str())).await?,
        None => store.load().await?,
    };
    let Some(location) = location else {
        anyhow::bail!("No downloaded asset found.");
    };
    if !location.exists() {
        anyhow::bail!(
            "{} is not playable offline, its data is gone.",
            location.display()
        );
    }

    println!("{}", location.display());
    Ok(())
}
