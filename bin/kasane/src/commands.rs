use std::collections::HashMap;

use clap::Subcommand;
use clap_handler::Handler;
use kasane::{Report, TaskId};

use crate::config::Coordinator;

mod delete;
mod download;
mod locate;
mod resume;
mod tracks;

#[derive(Subcommand, Clone, Handler)]
pub enum KasaneCommand {
    Download(download::DownloadCommand),
    Resume(resume::ResumeCommand),
    Locate(locate::LocateCommand),
    Delete(delete::DeleteCommand),
    Tracks(tracks::TracksCommand),
}

/// Report progress until every sequence has finished.
///
/// Ctrl-C stops without touching the journal, so `kasane resume` continues
/// where the download stopped.
pub(crate) async fn drive(coordinator: &mut Coordinator) -> anyhow::Result<()> {
    let mut deciles: HashMap<TaskId, u32> = HashMap::new();
    let mut failed = 0;

    loop {
        let report = tokio::select! {
            report = coordinator.next() => report,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, stopping. Run `kasane resume` to continue.");
                return Ok(());
            }
        };
        let Some(report) = report else {
            break;
        };

        match report {
            Report::Progress {
                asset,
                task,
                fraction,
            } => {
                let decile = (fraction * 10.).floor() as u32;
                if deciles.insert(task, decile) != Some(decile) {
                    tracing::info!("{asset} task {task}: {:.0}%", fraction * 100.);
                }
            }
            Report::TaskFinished { task, result, .. } => {
                deciles.remove(&task);
                if let Err(e) = result {
                    tracing::warn!("Task {task} failed: {e}");
                }
            }
            Report::SequenceFinished(outcome) => match outcome.result {
                Ok(()) => println!(
                    "{}\t{}",
                    outcome.asset.id,
                    outcome
                        .location
                        .map(|l| l.display().to_string())
                        .unwrap_or_default()
                ),
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        "{} stopped with {} option(s) stored: {e}",
                        outcome.asset.id,
                        outcome.fetched.len()
                    );
                }
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} download(s) failed");
    }
    Ok(())
}
