use std::collections::HashMap;

use kasane::{
    provider::TrackTarget,
    store::{memory::MemoryReferenceBackend, PersistedReferenceStore},
    DownloadCoordinator, DownloadSession, DownloadSessionBuilder, FetchFailure, FetchProvider,
    KasaneError, MediaCharacteristic, Report, TrackCatalog, TrackGroup, TrackOption,
};

use crate::{
    provider::{asset, Behavior, TestProvider},
    AssertWrapper,
};

type Coordinator = DownloadCoordinator<TestProvider, MemoryReferenceBackend>;

async fn coordinator(root: &std::path::Path, behavior: Behavior) -> Coordinator {
    let session = DownloadSession::new(TestProvider::new(root, behavior));
    let store = PersistedReferenceStore::new(MemoryReferenceBackend::new(), root);
    let mut coordinator = DownloadCoordinator::new(session, store);
    coordinator.initialize().await.assert_success();
    coordinator
}

#[tokio::test]
async fn test_download_every_option() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Succeed).await;

    coordinator.download(asset()).await?;
    let outcomes = coordinator.run_until_idle().await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.result, Ok(()));
    assert_eq!(outcome.tasks_issued, 2);
    assert!(outcome.fetched.contains(MediaCharacteristic::Audible, "a-alt"));

    let provider = coordinator.session().provider();
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_primary());
    assert_eq!(
        requests[1].target,
        Some(TrackTarget::new(MediaCharacteristic::Audible, "a-alt"))
    );
    // layered on the selection of the primary fetch
    assert_eq!(
        requests[1].selection.get(MediaCharacteristic::Legible),
        Some("s-default")
    );

    let catalog = TrackCatalog::new(
        provider.resolve_track_groups(&asset()).await?,
        provider.stored(),
    );
    assert!(catalog.is_complete());

    let location = root.path().join("movie");
    assert_eq!(coordinator.store().load().await?, Some(location));
    assert!(coordinator.is_idle());
    Ok(())
}

#[tokio::test]
async fn test_one_task_per_missing_option() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let provider = TestProvider::with_groups(
        root.path(),
        Behavior::Succeed,
        vec![
            TrackGroup::new(
                MediaCharacteristic::Legible,
                vec![
                    TrackOption::new("s-default", "Subtitles").default_option(),
                    TrackOption::new("s-alt", "SDH"),
                ],
            ),
            TrackGroup::new(
                MediaCharacteristic::Audible,
                vec![
                    TrackOption::new("a-default", "Audio").default_option(),
                    TrackOption::new("a-alt1", "Commentary"),
                    TrackOption::new("a-alt2", "Descriptive"),
                ],
            ),
        ],
    );
    let session = DownloadSession::new(provider);
    let store = PersistedReferenceStore::new(MemoryReferenceBackend::new(), root.path());
    let mut coordinator = DownloadCoordinator::new(session, store);
    coordinator.initialize().await?;

    coordinator.download(asset()).await?;
    let mut outcomes = Vec::new();
    while let Some(report) = coordinator.next().await {
        assert!(coordinator.session().pending_tasks().len() <= 1);
        if let Report::SequenceFinished(outcome) = report {
            outcomes.push(outcome);
        }
    }

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result, Ok(()));
    assert_eq!(outcomes[0].tasks_issued, 4);

    let targets: Vec<_> = coordinator
        .session()
        .provider()
        .requests()
        .into_iter()
        .map(|request| request.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            None,
            Some(TrackTarget::new(MediaCharacteristic::Audible, "a-alt1")),
            Some(TrackTarget::new(MediaCharacteristic::Audible, "a-alt2")),
            Some(TrackTarget::new(MediaCharacteristic::Legible, "s-alt")),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_unreachable_asset() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Unreachable).await;

    let result = coordinator.download(asset()).await;
    assert!(matches!(result, Err(KasaneError::AssetUnreachable(_))));

    let Some(Report::SequenceFinished(outcome)) = coordinator.next().await else {
        panic!("sequence not reported");
    };
    assert!(matches!(outcome.result, Err(FetchFailure::Unreachable(_))));
    assert_eq!(outcome.tasks_issued, 0);
    assert!(coordinator.next().await.is_none());

    assert!(coordinator.session().provider().requests().is_empty());
    assert_eq!(coordinator.store().load().await?, None);
    Ok(())
}

#[tokio::test]
async fn test_primary_failure_stops_sequence() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let failure = FetchFailure::Network("connection reset".to_string());
    let mut coordinator = coordinator(root.path(), Behavior::Fail(failure.clone())).await;

    coordinator.download(asset()).await?;
    let outcomes = coordinator.run_until_idle().await;

    assert_eq!(outcomes[0].result, Err(failure));
    assert_eq!(outcomes[0].tasks_issued, 1);
    assert_eq!(coordinator.session().provider().requests().len(), 1);
    assert_eq!(coordinator.store().load().await?, None);
    Ok(())
}

#[tokio::test]
async fn test_secondary_failure_keeps_fetched_options() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Succeed).await;

    coordinator.download(asset()).await?;
    // primary finished, switch the provider before the secondary starts
    loop {
        match coordinator.next().await.assert_success() {
            Report::Progress { .. } => {
                coordinator.session().provider().set_behavior(Behavior::Fail(
                    FetchFailure::Storage("disk full".to_string()),
                ));
            }
            Report::TaskFinished { .. } => break,
            Report::SequenceFinished(outcome) => panic!("finished early: {outcome:?}"),
        }
    }

    let outcomes = coordinator.run_until_idle().await;
    let outcome = &outcomes[0];
    assert!(matches!(outcome.result, Err(FetchFailure::Storage(_))));
    assert_eq!(outcome.tasks_issued, 2);
    assert!(outcome.fetched.contains(MediaCharacteristic::Audible, "a-default"));
    assert!(!outcome.fetched.contains(MediaCharacteristic::Audible, "a-alt"));

    // the primary fetch was stored before the failure
    assert!(coordinator.store().load().await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_provider_not_storing_target() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::ForgetTarget).await;

    coordinator.download(asset()).await?;
    let outcomes = coordinator.run_until_idle().await;

    assert!(matches!(outcomes[0].result, Err(FetchFailure::Storage(_))));
    assert_eq!(outcomes[0].tasks_issued, 2);
    Ok(())
}

#[tokio::test]
async fn test_cancel_download() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Hang).await;
    let asset = asset();

    coordinator.download(asset.clone()).await?;
    coordinator.cancel(&asset.id)?;

    let outcomes = coordinator.run_until_idle().await;
    assert_eq!(outcomes[0].result, Err(FetchFailure::Cancelled));
    assert!(coordinator.session().pending_tasks().is_empty());

    assert!(matches!(
        coordinator.cancel(&asset.id),
        Err(KasaneError::NotDownloading(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_download() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Hang).await;

    coordinator.download(asset()).await?;
    let result = coordinator.download(asset()).await;
    assert!(matches!(result, Err(KasaneError::DuplicateFetch)));

    coordinator.close();
    let outcomes = coordinator.run_until_idle().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result, Err(FetchFailure::Cancelled));
    Ok(())
}

#[tokio::test]
async fn test_progress_reports() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut coordinator = coordinator(root.path(), Behavior::Succeed).await;

    coordinator.download(asset()).await?;

    let mut progress: HashMap<u64, Vec<f64>> = HashMap::new();
    let mut finished: HashMap<u64, usize> = HashMap::new();
    while let Some(report) = coordinator.next().await {
        match report {
            Report::Progress { task, fraction, .. } => {
                assert!(!finished.contains_key(&task));
                progress.entry(task).or_default().push(fraction);
            }
            Report::TaskFinished { task, result, .. } => {
                assert!(result.is_ok());
                *finished.entry(task).or_default() += 1;
            }
            Report::SequenceFinished(_) => {}
        }
    }

    assert_eq!(finished.len(), 2);
    assert!(finished.values().all(|count| *count == 1));
    for fractions in progress.values() {
        assert_eq!(fractions, &vec![0.6, 1.0, 1.0]);
    }
    Ok(())
}

#[tokio::test]
async fn test_resume_after_restart() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let journal = root.path().join("journal.json");
    let store = || PersistedReferenceStore::new(MemoryReferenceBackend::new(), root.path());

    {
        let session = DownloadSessionBuilder::new()
            .journal(&journal)
            .build(TestProvider::new(root.path(), Behavior::Hang));
        let mut coordinator = DownloadCoordinator::new(session, store());
        coordinator.initialize().await?;
        coordinator.download(asset()).await?;
        assert_eq!(coordinator.session().pending_tasks().len(), 1);
        // dropped without closing, as if the process died
    }

    let session = DownloadSessionBuilder::new()
        .journal(&journal)
        .build(TestProvider::new(root.path(), Behavior::Succeed));
    let mut coordinator = DownloadCoordinator::new(session, store());
    coordinator.initialize().await?;

    let resumed = coordinator.session().resumed_tasks();
    assert_eq!(resumed.len(), 1);
    assert!(resumed[0].request.is_primary());

    let outcomes = coordinator.run_until_idle().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result, Ok(()));
    assert_eq!(outcomes[0].tasks_issued, 2);

    assert!(coordinator.session().pending_tasks().is_empty());
    let records: Vec<serde_json::Value> = serde_json::from_slice(&std::fs::read(&journal)?)?;
    assert!(records.is_empty());
    Ok(())
}
