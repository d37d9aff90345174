//! Error taxonomy for the suggestion-to-edit pipeline.
//!
//! Conflicts are not errors: a conflict pauses an application request and
//! waits for a caller decision.

use std::fmt;

use crate::suggestions::ParseDefect;
use crate::types::{Conflict, ContentHash, DocumentId};

/// Transport failure classes reported by a provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    Network,
    Timeout,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Timeout => "timeout",
        })
    }
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Every kind except `auth` may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind != ProviderErrorKind::Auth
    }
}

/// Error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Explicit references alone overflow the reserved context budget.
    #[error("explicit context needs {required} tokens but the budget allows {limit}")]
    BudgetExceeded { required: usize, limit: usize },

    /// A budget was constructed with a fraction outside (0, 1].
    #[error("reserved fraction {0} must be in (0, 1]")]
    InvalidBudget(f64),

    /// The provider answered but no suggestion could be extracted.
    #[error("malformed response: no usable suggestions ({} defects)", .defects.len())]
    MalformedResponse { defects: Vec<ParseDefect> },

    /// A hunk's declared ranges disagree with its lines.
    #[error("invalid diff format in hunk {hunk_index}: {detail}")]
    InvalidDiffFormat { hunk_index: usize, detail: String },

    /// A hunk's origin range falls outside the document.
    #[error("hunk {hunk_index} covers lines {start}..{end} of a {line_count}-line document")]
    OutOfRangeLineNumbers {
        hunk_index: usize,
        start: usize,
        end: usize,
        line_count: usize,
    },

    /// The diff was computed against another version and the request is strict.
    #[error("diff expects document {} but found {}", .expected.short(), .actual.short())]
    StaleDiff {
        expected: ContentHash,
        actual: ContentHash,
        conflicts: Vec<Conflict>,
    },

    /// A positional edit does not match the text it targets.
    #[error("edit at line {line}, column {column}: {detail}")]
    InvalidEdit {
        line: usize,
        column: usize,
        detail: String,
    },

    /// A resolution that cannot be applied to the pending hunk.
    #[error("resolution not applicable to hunk {hunk_index}: {detail}")]
    InvalidResolution { hunk_index: usize, detail: String },

    #[error("provider request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    /// The document no longer matches the state an undo/redo entry expects.
    #[error("document is at {} but history expects {}", .actual.short(), .expected.short())]
    DocumentDiverged {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),

    /// The worker for a document stopped before answering.
    #[error("application queue closed")]
    QueueClosed,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_the_only_fatal_provider_kind() {
        assert!(!ProviderError::new(ProviderErrorKind::Auth, "401").is_retryable());
        for kind in [
            ProviderErrorKind::RateLimit,
            ProviderErrorKind::Network,
            ProviderErrorKind::Timeout,
        ] {
            assert!(ProviderError::new(kind, "x").is_retryable());
        }
    }

    #[test]
    fn messages_name_the_failure() {
        let err = Error::BudgetExceeded {
            required: 900,
            limit: 500,
        };
        assert_eq!(
            err.to_string(),
            "explicit context needs 900 tokens but the budget allows 500"
        );
        let err = Error::from(ProviderError::new(ProviderErrorKind::RateLimit, "429"));
        assert_eq!(err.to_string(), "provider request failed: rate_limit error: 429");
    }
}
