//! Per-document application queue.
//!
//! Each open document is owned by one worker task that consumes a bounded
//! command channel in arrival order. Requests for one document are therefore
//! serialized, while different documents progress independently. Nothing
//! outside the worker ever holds the `Document`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::apply::{
    ApplicationRequest, ApplyReport, PendingDecision, Resolution, Step, Transaction,
};
use crate::config::ApplyConfig;
use crate::document::{Document, DocumentSnapshot};
use crate::error::{Error, Result};
use crate::events::{DiffEvent, EventSender};
use crate::types::{ContentHash, DocumentId, RequestId};

/// Where an application request is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationStatus {
    Queued,
    Validating,
    /// The document moved on since the diff was computed.
    ConflictChecking,
    /// `applied` hunks have reached the working copy so far.
    Applying { applied: usize },
    /// Waiting for [`ApplicationHandle::resolve`].
    Blocked(PendingDecision),
    Applied,
    Rejected(String),
    Cancelled,
}

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected(_) | Self::Cancelled)
    }
}

struct Decision {
    hunk_index: usize,
    resolution: Resolution,
    reply: oneshot::Sender<Result<()>>,
}

struct ApplyJob {
    request: ApplicationRequest,
    status: watch::Sender<ApplicationStatus>,
    decisions: mpsc::UnboundedReceiver<Decision>,
    cancel: CancellationToken,
    outcome: oneshot::Sender<Result<ApplyReport>>,
}

enum Command {
    Apply(ApplyJob),
    Undo(oneshot::Sender<Result<ContentHash>>),
    Redo(oneshot::Sender<Result<ContentHash>>),
    Snapshot(oneshot::Sender<DocumentSnapshot>),
    Replace(String, oneshot::Sender<ContentHash>),
    Close(oneshot::Sender<Document>),
}

/// Caller side of one enqueued application request.
///
/// Dropping the handle while the request is blocked on a decision cancels it;
/// dropping it at any other time lets the request run to completion.
pub struct ApplicationHandle {
    id: RequestId,
    document_id: DocumentId,
    status: watch::Receiver<ApplicationStatus>,
    decisions: mpsc::UnboundedSender<Decision>,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<ApplyReport>>,
}

impl ApplicationHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// The latest status.
    pub fn status(&self) -> ApplicationStatus {
        self.status.borrow().clone()
    }

    /// Waits for the next status change and returns it.
    ///
    /// Returns `None` once the request has finished and no further updates
    /// will come.
    pub async fn changed(&mut self) -> Option<ApplicationStatus> {
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    /// Waits until the request is blocked on a decision, or finished.
    pub async fn blocked(&mut self) -> Option<PendingDecision> {
        loop {
            match self.status.borrow_and_update().clone() {
                ApplicationStatus::Blocked(pending) => return Some(pending),
                status if status.is_terminal() => return None,
                _ => {}
            }
            self.status.changed().await.ok()?;
        }
    }

    /// Settles the decision the request is blocked on.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidResolution` if the request is not blocked on
    /// `hunk_index` or the resolution does not fit its conflict, and
    /// `Error::QueueClosed` if the request already finished.
    pub async fn resolve(&self, hunk_index: usize, resolution: Resolution) -> Result<()> {
        let (reply, answer) = oneshot::channel();
        self.decisions
            .send(Decision {
                hunk_index,
                resolution,
                reply,
            })
            .map_err(|_| Error::QueueClosed)?;
        answer.await.map_err(|_| Error::QueueClosed)?
    }

    /// Requests cancellation; it takes effect at the next hunk checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the request to finish.
    ///
    /// # Errors
    ///
    /// Returns the rejection error, `Error::Cancelled`, or
    /// `Error::QueueClosed` if the worker stopped before answering.
    pub async fn wait(self) -> Result<ApplyReport> {
        self.outcome.await.map_err(|_| Error::QueueClosed)?
    }
}

struct Worker {
    commands: mpsc::Sender<Command>,
    depth: Arc<AtomicUsize>,
}

/// Routes commands to the worker that owns each document.
pub struct ApplicationQueue {
    workers: Mutex<HashMap<DocumentId, Worker>>,
    config: ApplyConfig,
    events: EventSender,
}

impl ApplicationQueue {
    pub fn new(config: &ApplyConfig, events: EventSender) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            config: config.clone(),
            events,
        }
    }

    /// Hands `document` to a new worker task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn open(&self, document: Document) -> DocumentId {
        let document = document.with_undo_limit(self.config.undo_limit);
        let id = document.id();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker_loop(document, rx, Arc::clone(&depth), self.events.clone()));
        self.lock().insert(
            id,
            Worker {
                commands: tx,
                depth,
            },
        );
        tracing::info!(document = %id, "document opened");
        id
    }

    /// Queues `request` behind earlier commands for the same document.
    ///
    /// Waits while the document's queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownDocument` if the document is not open.
    pub async fn enqueue(&self, request: ApplicationRequest) -> Result<ApplicationHandle> {
        let (status_tx, status_rx) = watch::channel(ApplicationStatus::Queued);
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let handle = ApplicationHandle {
            id: request.id,
            document_id: request.document_id,
            status: status_rx,
            decisions: decision_tx,
            cancel: cancel.clone(),
            outcome: outcome_rx,
        };
        let document_id = request.document_id;
        tracing::debug!(
            document = %document_id,
            request = %request.id,
            hunks = request.diff.hunk_count(),
            "enqueue"
        );
        let job = ApplyJob {
            request,
            status: status_tx,
            decisions: decision_rx,
            cancel,
            outcome: outcome_tx,
        };
        self.send(document_id, Command::Apply(job)).await?;
        Ok(handle)
    }

    /// Reverts the document's latest application.
    ///
    /// # Errors
    ///
    /// `Error::UnknownDocument`, or the errors of [`Document::undo`].
    pub async fn undo(&self, id: DocumentId) -> Result<ContentHash> {
        let (tx, rx) = oneshot::channel();
        self.send(id, Command::Undo(tx)).await?;
        rx.await.map_err(|_| Error::QueueClosed)?
    }

    /// # Errors
    ///
    /// `Error::UnknownDocument`, or the errors of [`Document::redo`].
    pub async fn redo(&self, id: DocumentId) -> Result<ContentHash> {
        let (tx, rx) = oneshot::channel();
        self.send(id, Command::Redo(tx)).await?;
        rx.await.map_err(|_| Error::QueueClosed)?
    }

    /// Content of the document after every command queued before this one.
    pub async fn snapshot(&self, id: DocumentId) -> Result<DocumentSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(id, Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| Error::QueueClosed)
    }

    /// Feeds an edit made by the buffer owner into the document.
    pub async fn replace_content(
        &self,
        id: DocumentId,
        text: impl Into<String>,
    ) -> Result<ContentHash> {
        let (tx, rx) = oneshot::channel();
        self.send(id, Command::Replace(text.into(), tx)).await?;
        rx.await.map_err(|_| Error::QueueClosed)
    }

    /// Stops the document's worker after its pending commands and returns
    /// the document.
    ///
    /// The document is unregistered before the worker is told to stop, so
    /// any command issued after this call fails with `UnknownDocument`.
    pub async fn close(&self, id: DocumentId) -> Result<Document> {
        let worker = self.lock().remove(&id).ok_or(Error::UnknownDocument(id))?;
        let (tx, rx) = oneshot::channel();
        worker.depth.fetch_add(1, Ordering::SeqCst);
        worker
            .commands
            .send(Command::Close(tx))
            .await
            .map_err(|_| Error::QueueClosed)?;
        let document = rx.await.map_err(|_| Error::QueueClosed)?;
        tracing::info!(document = %id, "document closed");
        Ok(document)
    }

    /// Commands waiting for the document's worker, excluding the one running.
    pub fn queue_depth(&self, id: DocumentId) -> Result<usize> {
        self.lock()
            .get(&id)
            .map(|w| w.depth.load(Ordering::SeqCst))
            .ok_or(Error::UnknownDocument(id))
    }

    pub fn documents(&self) -> Vec<DocumentId> {
        self.lock().keys().copied().collect()
    }

    async fn send(&self, id: DocumentId, command: Command) -> Result<()> {
        let (commands, depth) = {
            let workers = self.lock();
            let worker = workers.get(&id).ok_or(Error::UnknownDocument(id))?;
            (worker.commands.clone(), Arc::clone(&worker.depth))
        };
        depth.fetch_add(1, Ordering::SeqCst);
        if commands.send(command).await.is_err() {
            depth.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QueueClosed);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn worker_loop(
    mut document: Document,
    mut commands: mpsc::Receiver<Command>,
    depth: Arc<AtomicUsize>,
    events: EventSender,
) {
    let document_id = document.id();
    while let Some(command) = commands.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);
        match command {
            Command::Apply(job) => run_job(&mut document, job, &events).await,
            Command::Undo(reply) => {
                let result = document.undo();
                if let Ok(hash) = &result {
                    events.send(DiffEvent::Undone {
                        document_id,
                        hash: *hash,
                    });
                }
                let _ = reply.send(result);
            }
            Command::Redo(reply) => {
                let result = document.redo();
                if let Ok(hash) = &result {
                    events.send(DiffEvent::Redone {
                        document_id,
                        hash: *hash,
                    });
                }
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(document.snapshot());
            }
            Command::Replace(text, reply) => {
                document.replace_content(&text);
                let _ = reply.send(document.hash());
            }
            Command::Close(reply) => {
                let _ = reply.send(document);
                return;
            }
        }
    }
    tracing::debug!(document = %document_id, "worker exiting, queue dropped");
}

async fn run_job(document: &mut Document, job: ApplyJob, events: &EventSender) {
    let ApplyJob {
        request,
        status,
        mut decisions,
        cancel,
        outcome,
    } = job;
    let document_id = document.id();
    let request_id = request.id;

    let result = drive(document, request, &status, &mut decisions, &cancel, events).await;
    match &result {
        Ok(report) => {
            tracing::info!(
                document = %document_id,
                request = %request_id,
                hunks = report.changed(),
                "applied"
            );
            status.send_replace(ApplicationStatus::Applied);
            events.send(DiffEvent::Applied {
                document_id,
                request_id,
                hunk_count: report.changed(),
                hash: report.hash_after,
            });
        }
        Err(Error::Cancelled) => {
            tracing::info!(document = %document_id, request = %request_id, "cancelled");
            status.send_replace(ApplicationStatus::Cancelled);
            events.send(DiffEvent::Cancelled {
                document_id,
                request_id,
            });
        }
        Err(e) => {
            tracing::warn!(
                document = %document_id,
                request = %request_id,
                error = %e,
                "rejected"
            );
            status.send_replace(ApplicationStatus::Rejected(e.to_string()));
            events.send(DiffEvent::Rejected {
                document_id,
                request_id,
                reason: e.to_string(),
            });
        }
    }
    let _ = outcome.send(result);
}

async fn drive(
    document: &mut Document,
    request: ApplicationRequest,
    status: &watch::Sender<ApplicationStatus>,
    decisions: &mut mpsc::UnboundedReceiver<Decision>,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Result<ApplyReport> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    status.send_replace(ApplicationStatus::Validating);
    let mut txn = Transaction::begin(document, request)?;
    if txn.is_stale() {
        status.send_replace(ApplicationStatus::ConflictChecking);
    }

    let mut applied = 0;
    loop {
        match txn.step() {
            Step::Applied { .. } => {
                applied += 1;
                status.send_replace(ApplicationStatus::Applying { applied });
                tokio::task::yield_now().await;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
            Step::Blocked(pending) => {
                if let Some(conflict) = &pending.conflict {
                    events.send(DiffEvent::Conflict {
                        document_id: document.id(),
                        request_id: txn.request().id,
                        hunk_index: conflict.hunk_index,
                        kind: conflict.kind,
                    });
                }
                status.send_replace(ApplicationStatus::Blocked(pending));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        decision = decisions.recv() => {
                            let Some(decision) = decision else {
                                return Err(Error::Cancelled);
                            };
                            let result = txn.resolve(decision.hunk_index, decision.resolution);
                            let settled = result.is_ok();
                            if settled {
                                status.send_replace(ApplicationStatus::Applying { applied });
                            }
                            let _ = decision.reply.send(result);
                            if settled {
                                break;
                            }
                        }
                    }
                }
            }
            Step::Done => break,
        }
    }
    Ok(txn.commit(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffGenerator;
    use crate::events;

    #[tokio::test]
    async fn unknown_document_is_rejected() {
        let (tx, _rx) = events::channel();
        let queue = ApplicationQueue::new(&ApplyConfig::default(), tx);
        let id = DocumentId::new();
        assert!(matches!(queue.undo(id).await, Err(Error::UnknownDocument(_))));
        assert!(queue.queue_depth(id).is_err());
    }

    #[tokio::test]
    async fn apply_then_undo_through_the_worker() {
        let (tx, mut rx) = events::channel();
        let queue = ApplicationQueue::new(&ApplyConfig::default(), tx);
        let id = queue.open(Document::new("a\nb\n"));
        let diff = DiffGenerator::default().generate("a\nb\n", "a\nB\n");

        let handle = queue
            .enqueue(ApplicationRequest::new(id, diff))
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.changed(), 1);
        assert_eq!(queue.snapshot(id).await.unwrap().text, "a\nB\n");
        assert_eq!(rx.recv().await.unwrap().name(), "diff.applied");

        queue.undo(id).await.unwrap();
        assert_eq!(queue.snapshot(id).await.unwrap().text, "a\nb\n");
        assert_eq!(rx.recv().await.unwrap().name(), "document.undone");

        let document = queue.close(id).await.unwrap();
        assert_eq!(document.redo_depth(), 1);
        assert!(queue.documents().is_empty());
    }

    #[tokio::test]
    async fn cancel_while_blocked_leaves_document_untouched() {
        let (tx, _rx) = events::channel();
        let queue = ApplicationQueue::new(&ApplyConfig::default(), tx);
        let id = queue.open(Document::new("a\nb\n"));
        let diff = DiffGenerator::default().generate("a\nb\n", "a\nB\n");

        let request = ApplicationRequest::new(id, diff).hunk_by_hunk();
        let mut handle = queue.enqueue(request).await.unwrap();
        let pending = handle.blocked().await.unwrap();
        assert_eq!(pending.hunk_index, 0);
        handle.cancel();
        assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
        assert_eq!(queue.snapshot(id).await.unwrap().text, "a\nb\n");
    }

    #[tokio::test]
    async fn commands_after_close_see_an_unknown_document() {
        let (tx, _rx) = events::channel();
        let queue = ApplicationQueue::new(&ApplyConfig::default(), tx);
        let id = queue.open(Document::new("a\n"));
        let diff = DiffGenerator::default().generate("a\n", "b\n");

        let request = ApplicationRequest::new(id, diff);
        let (closed, late) = tokio::join!(queue.close(id), queue.enqueue(request));
        assert_eq!(closed.unwrap().text(), "a\n");
        assert!(matches!(late, Err(Error::UnknownDocument(_))));
        assert!(matches!(queue.close(id).await, Err(Error::UnknownDocument(_))));
    }
}
