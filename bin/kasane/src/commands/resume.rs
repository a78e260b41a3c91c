use clap::Parser;
use clap_handler::handler;

use crate::config::ConfigOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "resume")]
/// Continue the downloads an interrupted run left unfinished
pub struct ResumeCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,
}

#[handler(ResumeCommand)]
pub async fn resume(args: ResumeCommand) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let mut coordinator = config.coordinator()?;
    coordinator.initialize().await?;

    if coordinator.is_idle() {
        tracing::info!("Nothing to resume.");
        return Ok(());
    }
    for record in coordinator.session().resumed_tasks() {
        tracing::info!("Resuming task {} of {}.", record.id, record.request.asset.id);
    }
    super::drive(&mut coordinator).await
}
