//! Suggestion-to-edit pipeline for AI-assisted text composition.
//!
//! Selects supporting context under a token budget, asks a model provider for
//! suggestions, turns them into line diffs, and applies those diffs to
//! documents through a per-document queue with conflict resolution and undo.

pub mod apply;
pub mod config;
pub mod context;
pub mod diff;
pub mod document;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod suggestions;
pub mod tokens;
pub mod types;

pub use apply::{ApplicationRequest, ApplyReport, ConflictPolicy, Resolution};
pub use config::PipelineConfig;
pub use document::Document;
pub use error::{Error, Result};
pub use pipeline::Pipeline;
