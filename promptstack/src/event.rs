//! Event bus for the `promptstack` binary.
//!
//! Results from the diff thread and notifications from the application
//! queue are normalised into one `AppEvent` enum and sent over a tokio
//! unbounded channel. The command that owns the receiver consumes them.

use promptstack_core::events::{DiffEvent, EventReceiver};
use tokio::sync::mpsc;

use crate::render::types::DiffPayload;

/// All events a command can receive from background work.
#[derive(Debug)]
#[non_exhaustive]
pub enum AppEvent {
    /// A rendered diff from the diff thread.
    DiffReady(Box<DiffPayload>),
    /// A notification from a document worker.
    Pipeline(DiffEvent),
}

/// Holds the sender and receiver ends of the event channel.
///
/// The sender is cloned for each background producer; the receiver stays
/// with the command loop.
pub struct EventHandler {
    pub tx: mpsc::UnboundedSender<AppEvent>,
    pub rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Relays queue notifications onto the application bus until either side closes.
pub fn spawn_pipeline_forwarder(
    mut events: EventReceiver,
    tx: mpsc::UnboundedSender<AppEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if tx.send(AppEvent::Pipeline(event)).is_err() {
                break;
            }
        }
    });
}

/// Writes a queue notification to the log.
pub fn log_pipeline_event(event: &DiffEvent) {
    match event {
        DiffEvent::Applied {
            hunk_count, hash, ..
        } => {
            tracing::info!(
                event = event.name(),
                hunks = hunk_count,
                hash = %hash.short(),
                "document updated"
            );
        }
        DiffEvent::Conflict {
            hunk_index, kind, ..
        } => {
            tracing::warn!(
                event = event.name(),
                hunk = hunk_index,
                %kind,
                "hunk needs a decision"
            );
        }
        DiffEvent::Rejected { reason, .. } => {
            tracing::warn!(event = event.name(), %reason, "request rejected");
        }
        other => tracing::info!(
            event = other.name(),
            document = %other.document_id(),
            "pipeline event"
        ),
    }
}
