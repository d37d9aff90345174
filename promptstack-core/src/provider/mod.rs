//! Model backends that turn a composition and its context into raw
//! suggestion text.
//!
//! The set of backends is closed and chosen from configuration when the
//! pipeline is built. Transport failures are classified into
//! [`ProviderErrorKind`](crate::error::ProviderErrorKind)s; [`send_with_retry`]
//! retries every kind except `auth` with exponential backoff.

mod anthropic;
mod replay;

pub use anthropic::AnthropicProvider;
pub use replay::ReplayProvider;

use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfig, ProviderKind, RetryConfig};
use crate::error::{Error, ProviderError, Result};
use crate::suggestions::SYSTEM_PROMPT;
use crate::types::{ContextItem, ContextKind};

#[derive(Debug)]
pub enum Provider {
    Anthropic(AnthropicProvider),
    Replay(ReplayProvider),
}

impl Provider {
    /// Builds the backend named by `config.kind`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the Anthropic API key variable is unset,
    /// and `Error::Io` when a replay file cannot be read.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config.kind {
            ProviderKind::Anthropic => {
                Ok(Self::Anthropic(AnthropicProvider::from_config(config)?))
            }
            ProviderKind::Replay => {
                Ok(Self::Replay(ReplayProvider::from_files(&config.replay_files)?))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Anthropic(_) => "anthropic",
            Provider::Replay(_) => "replay",
        }
    }

    /// Makes one request for suggestions on `composition`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Provider` on transport failure and `Error::Cancelled` if
    /// `cancel` fires first.
    pub async fn send(
        &self,
        composition: &str,
        context: &[ContextItem],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let user = render_user_message(composition, context);
        let call = async {
            match self {
                Provider::Anthropic(p) => p.complete(SYSTEM_PROMPT, &user).await,
                Provider::Replay(p) => p.complete(SYSTEM_PROMPT, &user).await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = call => result.map_err(Error::from),
        }
    }
}

/// [`Provider::send`] with retries.
///
/// Attempt `n` waits `retry.delay_before(n)` first; the wait is cancellable.
///
/// # Errors
///
/// Returns the last `Error::Provider` once attempts run out, an `auth` error
/// immediately, or `Error::Cancelled`.
pub async fn send_with_retry(
    provider: &Provider,
    composition: &str,
    context: &[ContextItem],
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<String> {
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = retry.delay_before(attempt);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        match provider.send(composition, context, cancel).await {
            Ok(raw) => {
                tracing::debug!(
                    provider = provider.name(),
                    attempt,
                    bytes = raw.len(),
                    "provider answered"
                );
                return Ok(raw);
            }
            Err(Error::Provider(e)) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    provider = provider.name(),
                    attempt,
                    error = %e,
                    "provider call failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    provider = provider.name(),
                    attempt,
                    error = %e,
                    "provider call failed"
                );
                return Err(e);
            }
        }
    }
}

/// The user turn: supporting context first, then the composition.
pub fn render_user_message(composition: &str, context: &[ContextItem]) -> String {
    let mut out = String::new();
    let supporting: Vec<&ContextItem> = context
        .iter()
        .filter(|item| item.kind != ContextKind::DocumentExcerpt)
        .collect();
    if !supporting.is_empty() {
        out.push_str("<context>\n");
        for item in supporting {
            let kind = match item.kind {
                ContextKind::LibraryPrompt => "library",
                ContextKind::HistoryEntry => "history",
                ContextKind::DocumentExcerpt => "document",
            };
            out.push_str(&format!("<item kind=\"{kind}\" id=\"{}\">\n", item.id));
            out.push_str(item.text.trim_end());
            out.push_str("\n</item>\n");
        }
        out.push_str("</context>\n\n");
    }
    out.push_str("<composition>\n");
    out.push_str(composition);
    if !composition.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</composition>\n");
    out
}

fn classify_status(status: u16, body: &str) -> ProviderError {
    use crate::error::ProviderErrorKind as Kind;
    let kind = match status {
        401 | 403 => Kind::Auth,
        429 => Kind::RateLimit,
        408 | 504 => Kind::Timeout,
        _ => Kind::Network,
    };
    ProviderError::new(kind, format!("HTTP {status}: {}", body.trim()))
}
