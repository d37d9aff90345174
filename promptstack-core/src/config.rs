//! Pipeline configuration.
//!
//! One immutable `PipelineConfig` value is built at startup and threaded through
//! every constructor; nothing reads configuration from globals. The file format
//! is TOML and every key is optional, so an empty or missing file yields the
//! defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Returns the path to the promptstack config file.
///
/// Prefers `$XDG_CONFIG_HOME/promptstack/config.toml`; falls back to
/// `~/.config/promptstack/config.toml` when the env var is absent.
pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("promptstack").join("config.toml")
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub provider: ProviderConfig,
    pub budget: BudgetConfig,
    pub context: ContextConfig,
    pub diff: DiffConfig,
    pub apply: ApplyConfig,
    pub retry: RetryConfig,
}

/// Which model backend the pipeline talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API over HTTPS.
    #[default]
    Anthropic,
    /// Recorded responses served from files, in order.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Response files for the `replay` backend.
    pub replay_files: Vec<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: "claude-sonnet-4-5".to_owned(),
            api_key_env: "ANTHROPIC_API_KEY".to_owned(),
            base_url: "https://api.anthropic.com".to_owned(),
            max_tokens: 4096,
            timeout_secs: 60,
            replay_files: Vec::new(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Model context window in tokens.
    pub context_window: usize,
    /// Share of the window reserved for supporting material; also the block threshold.
    pub reserved_fraction: f64,
    /// Share of the window at which the composition status turns to a warning.
    pub warning_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            reserved_fraction: 0.25,
            warning_fraction: 0.15,
        }
    }
}

/// Relative weights of the context relevance signals.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub tags: f64,
    pub keywords: f64,
    pub recency: f64,
    pub usage: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            tags: 0.3,
            keywords: 0.3,
            recency: 0.2,
            usage: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Upper bound on non-explicit items; `None` means only the budget limits.
    pub max_items: Option<usize>,
    pub weights: ScoreWeights,
    /// Hours after which the recency signal has halved.
    pub recency_half_life_hours: f64,
    /// Words ignored by keyword extraction on top of the built-in list.
    pub extra_stopwords: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_items: Some(8),
            weights: ScoreWeights::default(),
            recency_half_life_hours: 24.0,
            extra_stopwords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Unchanged lines kept around each change; changes closer than this coalesce.
    pub context_lines: usize,
    /// Time limit for the Myers search before it degrades to a coarser diff.
    pub deadline_ms: u64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 3,
            deadline_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Commands buffered per document before `enqueue` waits for room.
    pub queue_capacity: usize,
    /// Undo entries kept per document; the oldest is dropped beyond this.
    pub undo_limit: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            undo_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total provider attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Backoff before attempt `attempt` (1-based; attempt 1 has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file exists but cannot be read, and
    /// `Error::Config` if it cannot be parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`PipelineConfig::load`], but config errors are soft failures:
    /// they are logged and the defaults are used.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unusable config");
                Self::default()
            }
        }
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let b = &self.budget;
        if !(b.reserved_fraction > 0.0 && b.reserved_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "budget.reserved_fraction must be in (0, 1], got {}",
                b.reserved_fraction
            )));
        }
        if !(b.warning_fraction > 0.0 && b.warning_fraction <= b.reserved_fraction) {
            return Err(Error::Config(format!(
                "budget.warning_fraction must be in (0, reserved_fraction], got {}",
                b.warning_fraction
            )));
        }
        if self.apply.queue_capacity == 0 {
            return Err(Error::Config(
                "apply.queue_capacity must be at least 1".to_owned(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        let w = &self.context.weights;
        if [w.tags, w.keywords, w.recency, w.usage].iter().any(|v| *v < 0.0) {
            return Err(Error::Config(
                "context.weights must not be negative".to_owned(),
            ));
        }
        Ok(())
    }
}
