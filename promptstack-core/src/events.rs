//! Change notifications emitted by application workers.
//!
//! Every worker holds a clone of one `EventSender`. The channel behind it
//! only exists while a listener is subscribed; events emitted with no
//! listener are dropped on the spot rather than buffered.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::types::{ConflictKind, ContentHash, DocumentId, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DiffEvent {
    /// `diff.applied`: a request committed.
    Applied {
        document_id: DocumentId,
        request_id: RequestId,
        hunk_count: usize,
        hash: ContentHash,
    },
    /// `diff.conflict`: a request blocked on a conflicting hunk.
    Conflict {
        document_id: DocumentId,
        request_id: RequestId,
        hunk_index: usize,
        kind: ConflictKind,
    },
    /// `diff.rejected`: a request failed validation.
    Rejected {
        document_id: DocumentId,
        request_id: RequestId,
        reason: String,
    },
    /// `diff.cancelled`: a request was cancelled before committing.
    Cancelled {
        document_id: DocumentId,
        request_id: RequestId,
    },
    /// `document.undone`
    Undone {
        document_id: DocumentId,
        hash: ContentHash,
    },
    /// `document.redone`
    Redone {
        document_id: DocumentId,
        hash: ContentHash,
    },
}

impl DiffEvent {
    pub fn document_id(&self) -> DocumentId {
        match self {
            DiffEvent::Applied { document_id, .. }
            | DiffEvent::Conflict { document_id, .. }
            | DiffEvent::Rejected { document_id, .. }
            | DiffEvent::Cancelled { document_id, .. }
            | DiffEvent::Undone { document_id, .. }
            | DiffEvent::Redone { document_id, .. } => *document_id,
        }
    }

    /// Dotted event name, e.g. `"diff.applied"`.
    pub fn name(&self) -> &'static str {
        match self {
            DiffEvent::Applied { .. } => "diff.applied",
            DiffEvent::Conflict { .. } => "diff.conflict",
            DiffEvent::Rejected { .. } => "diff.rejected",
            DiffEvent::Cancelled { .. } => "diff.cancelled",
            DiffEvent::Undone { .. } => "document.undone",
            DiffEvent::Redone { .. } => "document.redone",
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<DiffEvent>;

/// Shared handle the workers emit through.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<DiffEvent>>>>,
}

impl EventSender {
    /// A sender with no listener attached yet.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Attaches a listener and returns its receiver.
    ///
    /// Returns `None` while another receiver is still alive.
    pub fn subscribe(&self) -> Option<EventReceiver> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Some(rx)
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Delivers `event` to the listener, if there is one.
    pub fn send(&self, event: DiffEvent) {
        let mut slot = self.lock();
        if let Some(tx) = slot.as_ref() {
            if tx.send(event).is_err() {
                *slot = None;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<DiffEvent>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a sender with a listener already attached.
pub fn channel() -> (EventSender, EventReceiver) {
    let sender = EventSender::detached();
    let (tx, rx) = mpsc::unbounded_channel();
    *sender.lock() = Some(tx);
    (sender, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled() -> DiffEvent {
        DiffEvent::Cancelled {
            document_id: DocumentId::new(),
            request_id: RequestId::new(),
        }
    }

    #[test]
    fn events_without_a_listener_are_not_buffered() {
        let sender = EventSender::detached();
        for _ in 0..1_000 {
            sender.send(cancelled());
        }
        let mut rx = sender.subscribe().unwrap();
        assert!(rx.try_recv().is_err());

        sender.send(cancelled());
        assert_eq!(rx.try_recv().unwrap().name(), "diff.cancelled");
    }

    #[test]
    fn one_listener_at_a_time() {
        let sender = EventSender::detached();
        let rx = sender.subscribe().unwrap();
        assert!(sender.subscribe().is_none());
        drop(rx);
        sender.send(cancelled());
        assert!(!sender.is_subscribed());
        assert!(sender.subscribe().is_some());
    }
}
