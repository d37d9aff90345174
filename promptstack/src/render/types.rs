//! Owned request and result types for the diff thread.
//!
//! Everything here is `Send` and carries no borrowed data, so values move
//! freely between the worker thread and the tokio runtime.

use promptstack_core::types::Diff;

/// How a finished diff is turned into text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderStyle {
    /// Plain unified diff, suitable for `patch`.
    #[default]
    Unified,
    /// Unified layout with changed words marked `[-old-]` and `{+new+}`.
    Words,
}

/// Work sent to the diff thread.
#[derive(Debug, Clone)]
pub struct DiffRequest {
    /// Shown in the file header lines of the rendering.
    pub original_label: String,
    pub modified_label: String,
    pub original: String,
    pub modified: String,
    pub style: RenderStyle,
}

/// A computed diff and its text rendering.
#[derive(Debug, Clone)]
pub struct DiffPayload {
    pub diff: Diff,
    pub rendered: String,
}
