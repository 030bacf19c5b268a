use std::time::Duration;

use anyhow::{Context as _, Result};
use swap_nursery::nursery::{EventReceiver, NurseryEvent};

pub async fn next_event(events: &mut EventReceiver, timeout: Duration) -> Result<NurseryEvent> {
    tokio::time::timeout(timeout, events.recv())
        .await
        .context("timeout waiting for nursery event")?
        .context("nursery event channel closed")
}

/// Events already emitted, without waiting.
pub fn drain(events: &mut EventReceiver) -> Vec<NurseryEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub async fn assert_quiet(events: &mut EventReceiver, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected nursery event {}: {event:?}", event.name());
    }
}
