use super::test_helpers::*;
use super::*;
use crate::error::DownloadError;
use crate::types::{Event, Status};

mod queue;

/// Drain every event currently buffered on `rx`
fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn positions(tasks: &[InstallTask]) -> Vec<(String, i64)> {
    tasks
        .iter()
        .filter(|t| !t.status.is_terminal())
        .map(|t| (t.release_id.to_string(), t.queue_position))
        .collect()
}
