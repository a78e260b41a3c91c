use clap::Parser;
use clap_handler::Handler;

mod commands;
mod config;

#[derive(Parser, clap_handler::Handler, Clone)]
#[clap(name = "kasane", version)]
struct KasaneArgs {
    #[clap(subcommand)]
    command: commands::KasaneCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = KasaneArgs::parse();
    args.run().await
}
