use kasane::{
    provider::TrackTarget, DownloadSession, DownloadSessionBuilder, FetchFailure, KasaneError,
    MediaCharacteristic, MediaSelection, SessionEvent, TaskEvent,
};

use crate::{
    provider::{asset, Behavior, TestProvider},
    AssertWrapper,
};

fn alt_audio() -> TrackTarget {
    TrackTarget::new(MediaCharacteristic::Audible, "a-alt")
}

#[tokio::test]
async fn test_start_before_initialize() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Succeed));
    assert!(!session.is_available());

    let result = session.start_primary(asset()).await;
    assert!(matches!(result, Err(KasaneError::SessionUnavailable)));
    Ok(())
}

#[tokio::test]
async fn test_initialize_twice() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Succeed));
    let _events = session.initialize().await?;

    let result = session.initialize().await;
    assert!(matches!(result, Err(KasaneError::InvalidState(_))));
    Ok(())
}

#[tokio::test]
async fn test_events_of_a_task() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Succeed));
    let mut events = session.initialize().await?;

    let task = session.start_primary(asset()).await?;
    let mut received = Vec::new();
    loop {
        let SessionEvent {
            task: id,
            sequence,
            event,
        } = events.next().await.assert_success();
        assert_eq!(id, task);
        assert_eq!(sequence, received.len() as u64);

        let terminal = event.is_terminal();
        received.push(event);
        if terminal {
            break;
        }
    }

    assert!(matches!(received[0], TaskEvent::SelectionResolved(_)));
    assert_eq!(
        received[1..4],
        [
            TaskEvent::Progress(0.6),
            TaskEvent::Progress(1.0),
            TaskEvent::Progress(1.0)
        ]
    );
    assert_eq!(
        received[4],
        TaskEvent::Finished(Ok(root.path().join("movie")))
    );
    assert!(session.pending_tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_provider_vanishes() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Vanish));
    let mut events = session.initialize().await?;

    session.start_primary(asset()).await?;
    let finished = loop {
        let event = events.next().await.assert_success();
        if let TaskEvent::Finished(result) = event.event {
            break result;
        }
    };
    assert!(matches!(finished, Err(FetchFailure::Network(_))));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_option_fetch() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Hang));
    let _events = session.initialize().await?;

    let base = MediaSelection::new();
    session
        .start_for_option(asset(), &base, alt_audio())
        .await?;
    let result = session.start_for_option(asset(), &base, alt_audio()).await;
    assert!(matches!(result, Err(KasaneError::DuplicateFetch)));

    // another option of the same asset is fine
    session
        .start_for_option(
            asset(),
            &base,
            TrackTarget::new(MediaCharacteristic::Legible, "s-default"),
        )
        .await?;
    assert_eq!(session.pending_tasks().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cancel_ignored_by_provider() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Hang));
    let mut events = session.initialize().await?;

    let task = session.start_primary(asset()).await?;
    session.cancel(task)?;

    let finished = loop {
        let event = events.next().await.assert_success();
        if let TaskEvent::Finished(result) = event.event {
            break result;
        }
    };
    assert_eq!(finished, Err(FetchFailure::Cancelled));
    assert!(matches!(
        session.cancel(task),
        Err(KasaneError::UnknownTask(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_close_session() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let mut session = DownloadSession::new(TestProvider::new(root.path(), Behavior::Hang));
    let mut events = session.initialize().await?;

    session.start_primary(asset()).await?;
    session.close();
    assert!(matches!(
        session.start_primary(asset()).await,
        Err(KasaneError::SessionUnavailable)
    ));

    let mut terminal = 0;
    while let Some(event) = events.next().await {
        if event.event.is_terminal() {
            assert_eq!(event.event, TaskEvent::Finished(Err(FetchFailure::Cancelled)));
            terminal += 1;
        }
    }
    assert_eq!(terminal, 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_resume_is_reported() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let journal = root.path().join("journal.json");

    {
        let mut session = DownloadSessionBuilder::new()
            .journal(&journal)
            .build(TestProvider::new(root.path(), Behavior::Hang));
        let _events = session.initialize().await?;
        session.start_primary(asset()).await?;
    }

    let mut session = DownloadSessionBuilder::new()
        .journal(&journal)
        .build(TestProvider::new(root.path(), Behavior::Unreachable));
    let mut events = session.initialize().await?;
    assert_eq!(session.resumed_tasks().len(), 1);
    assert!(session.pending_tasks().is_empty());

    let event = events.next().await.assert_success();
    assert_eq!(event.task, session.resumed_tasks()[0].id);
    assert!(matches!(
        event.event,
        TaskEvent::Finished(Err(FetchFailure::Unreachable(_)))
    ));

    // new tasks never reuse journalled ids
    session.provider().set_behavior(Behavior::Succeed);
    let task = session.start_primary(asset()).await?;
    assert!(task > event.task);
    Ok(())
}
