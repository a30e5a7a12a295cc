//! Custom test assertions for integration tests

use std::path::Path;
use std::time::Duration;
use sideload_dl::{Event, ReleaseId, Sideloader};

/// Result of waiting for a task to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Task completed successfully
    Completed,
    /// Task failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a task to reach a terminal state (Completed or Failed)
///
/// Subscribe before enqueuing: events sent before the call are not seen.
pub async fn wait_for_completion(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: &ReleaseId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed { id: event_id }) if event_id == *id => {
                    return WaitResult::Completed;
                }
                Ok(Event::Failed {
                    id: event_id,
                    error,
                    ..
                }) if event_id == *id => {
                    return WaitResult::Failed(error);
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Collect all events until timeout or predicate is satisfied
pub async fn collect_events_until<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    mut stop_predicate: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let should_stop = stop_predicate(&event);
            collected.push(event);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}

/// Assert that a task completed successfully
pub async fn assert_task_completed(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: &ReleaseId,
    timeout: Duration,
) {
    match wait_for_completion(events, id, timeout).await {
        WaitResult::Completed => {}
        WaitResult::Failed(error) => {
            panic!("Task {} failed with error: {}", id, error);
        }
        WaitResult::Timeout => {
            panic!("Timeout waiting for task {} to complete", id);
        }
        WaitResult::ChannelClosed => {
            panic!("Event channel closed while waiting for task {}", id);
        }
    }
}

/// Assert that a task failed with expected error
pub async fn assert_task_failed(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: &ReleaseId,
    timeout: Duration,
    expected_error_contains: Option<&str>,
) {
    match wait_for_completion(events, id, timeout).await {
        WaitResult::Failed(error) => {
            if let Some(expected) = expected_error_contains {
                assert!(
                    error.contains(expected),
                    "Expected error to contain '{}', got: {}",
                    expected,
                    error
                );
            }
        }
        WaitResult::Completed => {
            panic!("Expected task {} to fail, but it completed", id);
        }
        WaitResult::Timeout => {
            panic!("Timeout waiting for task {} to fail", id);
        }
        WaitResult::ChannelClosed => {
            panic!("Event channel closed while waiting for task {}", id);
        }
    }
}

/// Assert that the queue holds no live task
pub async fn assert_queue_idle(sideloader: &Sideloader) {
    let tasks = sideloader.list_tasks().await.unwrap();
    assert!(
        tasks.iter().all(|t| t.status.is_terminal()),
        "expected an idle queue, got {:?}",
        tasks
    );
}

/// Assert that files exist
pub fn assert_files_exist(dir: &Path, expected_files: &[&str]) {
    for filename in expected_files {
        let path = dir.join(filename);
        assert!(path.exists(), "Expected file to exist: {}", path.display());
    }
}
