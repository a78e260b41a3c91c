use clap::Parser;
use clap_handler::handler;
use kasane::AssetId;

use crate::config::ConfigOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "delete", visible_alias = "rm")]
/// Delete a downloaded asset and forget its location
pub struct DeleteCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    /// Asset to delete, the most recent download by default
    pub id: Option<String>,
}

#[handler(DeleteCommand)]
pub async fn delete(args: DeleteCommand) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let store = config.store();

    match &args.id {
        Some(id) => store.clear_asset(&AssetId::new(id.as_str())).await?,
        None => store.clear().await?,
    }
    tracing::info!("Deleted.");
    Ok(())
}
