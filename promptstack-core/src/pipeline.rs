//! The facade a host application talks to.
//!
//! Stages that only compute (selection, parsing, diffing) run on the caller's
//! task and can be used concurrently. Everything that mutates a document goes
//! through the application queue.

use tokio_util::sync::CancellationToken;

use crate::apply::ApplicationRequest;
use crate::config::PipelineConfig;
use crate::context::{ContextSelector, Selection};
use crate::diff::DiffGenerator;
use crate::document::{Document, DocumentSnapshot};
use crate::error::Result;
use crate::events::{EventReceiver, EventSender};
use crate::provider::{send_with_retry, Provider};
use crate::queue::{ApplicationHandle, ApplicationQueue};
use crate::suggestions::{self, ParseOutcome};
use crate::tokens::{ContextBudget, TokenBudget};
use crate::types::{ContentHash, ContextCandidate, ContextItem, Diff, DocumentId, Suggestion};

pub struct Pipeline {
    config: PipelineConfig,
    provider: Provider,
    generator: DiffGenerator,
    queue: ApplicationQueue,
    events: EventSender,
}

impl Pipeline {
    /// Builds a pipeline with the provider named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration or a provider that
    /// cannot be constructed.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let provider = Provider::from_config(&config.provider)?;
        Self::with_provider(config, provider)
    }

    /// Builds a pipeline around an already constructed provider.
    pub fn with_provider(config: PipelineConfig, provider: Provider) -> Result<Self> {
        config.validate()?;
        let events = EventSender::detached();
        tracing::info!(provider = provider.name(), "pipeline ready");
        Ok(Self {
            generator: DiffGenerator::new(&config.diff),
            queue: ApplicationQueue::new(&config.apply, events.clone()),
            events,
            provider,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Attaches the event listener.
    ///
    /// Events raised before anyone subscribes are dropped. Returns `None`
    /// while an earlier receiver is still alive.
    pub fn subscribe(&self) -> Option<EventReceiver> {
        self.events.subscribe()
    }

    /// The configured share of the model window for supporting context.
    pub fn context_budget(&self) -> Result<ContextBudget> {
        ContextBudget::from_config(&self.config.budget)
    }

    pub fn token_budget(&self) -> TokenBudget {
        TokenBudget::from_config(&self.config.budget)
    }

    /// Selects the context for a request about `excerpt`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BudgetExceeded` when explicit references alone do not
    /// fit `budget`.
    pub fn select_context(
        &self,
        excerpt: &str,
        library: &[ContextCandidate],
        history: &[ContextCandidate],
        budget: &ContextBudget,
    ) -> Result<Vec<ContextItem>> {
        self.selection(excerpt, library, history, budget).into_items()
    }

    /// Like [`Pipeline::select_context`] but keeps the token accounting and
    /// never fails.
    pub fn selection(
        &self,
        excerpt: &str,
        library: &[ContextCandidate],
        history: &[ContextCandidate],
        budget: &ContextBudget,
    ) -> Selection {
        let selection =
            ContextSelector::new(&self.config.context).select(excerpt, library, history, budget);
        tracing::debug!(
            items = selection.items.len(),
            mandatory = selection.mandatory_tokens,
            supporting = selection.supporting_tokens,
            limit = selection.limit,
            "context selected"
        );
        selection
    }

    /// Asks the provider for suggestions and parses the answer.
    ///
    /// # Errors
    ///
    /// `Error::Provider` after retries run out, `Error::Cancelled`, or
    /// `Error::MalformedResponse` when nothing usable came back.
    pub async fn request_suggestions(
        &self,
        context: &[ContextItem],
        excerpt: &str,
        cancel: &CancellationToken,
    ) -> Result<ParseOutcome> {
        let raw =
            send_with_retry(&self.provider, excerpt, context, &self.config.retry, cancel).await?;
        let outcome = suggestions::parse(&raw)?;
        tracing::info!(
            suggestions = outcome.suggestions.len(),
            defects = outcome.defects.len(),
            "suggestions received"
        );
        Ok(outcome)
    }

    pub fn generate_diff(&self, original: &str, modified: &str) -> Diff {
        self.generator.generate(original, modified)
    }

    /// Diff for `suggestion` against `original`, the text it was requested for.
    pub fn suggestion_diff(&self, suggestion: &Suggestion, original: &str) -> Result<Diff> {
        suggestion.to_diff(original, &self.generator)
    }

    pub fn open(&self, document: Document) -> DocumentId {
        self.queue.open(document)
    }

    pub async fn snapshot(&self, id: DocumentId) -> Result<DocumentSnapshot> {
        self.queue.snapshot(id).await
    }

    pub async fn replace_content(
        &self,
        id: DocumentId,
        text: impl Into<String>,
    ) -> Result<ContentHash> {
        self.queue.replace_content(id, text).await
    }

    pub async fn close(&self, id: DocumentId) -> Result<Document> {
        self.queue.close(id).await
    }

    pub async fn enqueue(&self, request: ApplicationRequest) -> Result<ApplicationHandle> {
        self.queue.enqueue(request).await
    }

    pub async fn undo(&self, id: DocumentId) -> Result<ContentHash> {
        self.queue.undo(id).await
    }

    pub async fn redo(&self, id: DocumentId) -> Result<ContentHash> {
        self.queue.redo(id).await
    }

    pub fn queue_depth(&self, id: DocumentId) -> Result<usize> {
        self.queue.queue_depth(id)
    }
}
