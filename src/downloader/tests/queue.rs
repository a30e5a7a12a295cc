use super::*;
use futures::StreamExt;

#[tokio::test]
async fn test_enqueue_appends_at_tail() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let mut events = sideloader.subscribe();

    let a = sideloader
        .enqueue(&ReleaseId::new("Game A"), false)
        .await
        .unwrap();
    let b = sideloader
        .enqueue(&ReleaseId::new("Game B"), false)
        .await
        .unwrap();

    assert_eq!(a.queue_position, 0);
    assert_eq!(b.queue_position, 1);
    assert_eq!(a.status, Status::Queued);

    let queued: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::Queued { id, position } => Some((id.to_string(), position)),
            _ => None,
        })
        .collect();
    assert_eq!(
        queued,
        vec![("Game A".to_string(), 0), ("Game B".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_promote_moves_task_to_front() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    let b = ReleaseId::new("Game B");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader.enqueue(&b, false).await.unwrap();

    sideloader.promote(&b).await.unwrap();

    let tasks = sideloader.list_tasks().await.unwrap();
    assert_eq!(
        positions(&tasks),
        vec![("Game B".to_string(), 0), ("Game A".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_promote_at_front_is_noop() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader
        .enqueue(&ReleaseId::new("Game B"), false)
        .await
        .unwrap();
    let before = sideloader.get_task(&a).await.unwrap().unwrap();
    let mut events = sideloader.subscribe();

    let after = sideloader.promote(&a).await.unwrap();

    assert_eq!(after.queue_position, 0);
    assert_eq!(after.status, Status::Queued);
    assert_eq!(after.last_updated_at, before.last_updated_at);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_promote_unpauses_task() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    let b = ReleaseId::new("Game B");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader.enqueue(&b, false).await.unwrap();
    sideloader.pause(&b).await.unwrap();

    let promoted = sideloader.promote(&b).await.unwrap();

    assert_eq!(promoted.status, Status::Queued);
    assert_eq!(promoted.queue_position, 0);
}

#[tokio::test]
async fn test_enqueue_unknown_release_fails() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;

    let err = sideloader
        .enqueue(&ReleaseId::new("Not In Catalog"), false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Download(DownloadError::ReleaseNotInCatalog { .. })
    ));
    assert_eq!(err.kind(), crate::error::FailureKind::NonRetryable);
    assert!(sideloader.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_enqueue_duplicate_returns_existing_task() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader
        .enqueue(&ReleaseId::new("Game B"), false)
        .await
        .unwrap();
    let mut events = sideloader.subscribe();

    let again = sideloader.enqueue(&a, true).await.unwrap();

    assert_eq!(again.queue_position, 0);
    assert!(!again.download_only);
    assert_eq!(sideloader.list_tasks().await.unwrap().len(), 2);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_enqueue_finished_release_requeues_at_tail() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader
        .enqueue(&ReleaseId::new("Game B"), false)
        .await
        .unwrap();
    sideloader.db.mark_completed(&a).await.unwrap();

    let task = sideloader.enqueue(&a, false).await.unwrap();

    assert_eq!(task.status, Status::Queued);
    assert_eq!(task.queue_position, 1);
}

#[tokio::test]
async fn test_enqueue_rejected_during_shutdown() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    sideloader
        .queue_state
        .accepting_new
        .store(false, std::sync::atomic::Ordering::SeqCst);

    let err = sideloader
        .enqueue(&ReleaseId::new("Game A"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn test_retry_requeues_failed_task_at_tail() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    sideloader.enqueue(&a, false).await.unwrap();
    sideloader
        .enqueue(&ReleaseId::new("Game B"), false)
        .await
        .unwrap();
    sideloader
        .db
        .update_progress(&a, 0.5, Some(10), Some(20))
        .await
        .unwrap();
    sideloader.db.mark_failed(&a, "network down").await.unwrap();

    let task = sideloader.retry(&a).await.unwrap();

    assert_eq!(task.status, Status::Queued);
    assert_eq!(task.queue_position, 1);
    assert_eq!(task.progress, 0.0);
    assert_eq!(task.error_message, None);
}

#[tokio::test]
async fn test_retry_requires_failed_task() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    sideloader.enqueue(&a, false).await.unwrap();

    let err = sideloader.retry(&a).await.unwrap_err();

    match err {
        Error::Download(DownloadError::InvalidState {
            operation,
            current_state,
            ..
        }) => {
            assert_eq!(operation, "retry");
            assert_eq!(current_state, "QUEUED");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_clear_finished_removes_terminal_tasks() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let a = ReleaseId::new("Game A");
    let b = ReleaseId::new("Game B");
    let c = ReleaseId::new("Game C");
    for id in [&a, &b, &c] {
        sideloader.enqueue(id, false).await.unwrap();
    }
    sideloader.db.mark_completed(&a).await.unwrap();
    sideloader.db.mark_failed(&b, "boom").await.unwrap();

    let failed_downloads =
        crate::recovery::download_dir(&sideloader.config.download.download_dir, &b);
    std::fs::create_dir_all(&failed_downloads).unwrap();
    std::fs::write(failed_downloads.join("game.7z.001"), b"partial").unwrap();
    let staging_dir = &sideloader.config.install.staging_dir;
    let staged = crate::install::staged_package_path(staging_dir, TEST_PACKAGE, &b.hash());
    std::fs::create_dir_all(staging_dir).unwrap();
    std::fs::write(&staged, b"rejected package").unwrap();

    let mut events = sideloader.subscribe();
    let removed = sideloader.clear_finished().await.unwrap();

    assert_eq!(removed, 2);
    let remaining = sideloader.list_tasks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].release_id, c);
    assert!(!failed_downloads.exists());
    assert!(!staged.exists());

    let removed_events = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::Removed { .. }))
        .count();
    assert_eq!(removed_events, 2);
}

#[tokio::test]
async fn test_watch_queue_streams_snapshots() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    let mut stream = sideloader.watch_queue();

    let initial = stream.next().await.unwrap();
    assert!(initial.is_empty());

    sideloader
        .enqueue(&ReleaseId::new("Game A"), false)
        .await
        .unwrap();

    let snapshot = stream.next().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].release_id.as_str(), "Game A");
}

#[tokio::test]
async fn test_get_task_unknown_is_none() {
    let (sideloader, _temp_dir) = create_test_sideloader().await;
    assert!(
        sideloader
            .get_task(&ReleaseId::new("Game A"))
            .await
            .unwrap()
            .is_none()
    );
}
