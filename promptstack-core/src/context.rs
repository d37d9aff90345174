//! Context selection under a token budget.
//!
//! Candidates from the prompt library and the history are scored against the
//! document, then packed greedily by score until the next item would overflow
//! the budget. Explicit references and the document excerpt are never dropped.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ContextConfig;
use crate::error::{Error, Result};
use crate::tokens::{estimate_tokens, ContextBudget};
use crate::types::{ContextCandidate, ContextItem, ContextKind};

/// Id given to the document excerpt item.
pub const EXCERPT_ID: &str = "document";

static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```|`[^`\n]+`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(#+|[-*+]|\d+\.)\s+|\*+|_+").unwrap());
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\s]+").unwrap());

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "he", "in",
    "is", "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this",
    "but", "they", "you", "we", "your", "my", "our", "their", "his", "her", "him", "me", "us",
    "them", "what", "which", "who", "whom", "when", "where", "why", "how", "all", "each",
    "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
    "own", "same", "so", "than", "too", "very", "can", "just", "should", "now", "do", "does",
    "did", "don", "doesn", "didn", "couldn", "wouldn", "code", "function", "method", "class",
    "variable", "string", "number", "boolean", "array", "object", "null", "undefined", "true",
    "false", "return", "if", "else", "while", "case", "break", "continue", "import", "export",
    "const", "let", "var", "new", "type", "enum", "struct", "impl", "pub", "fn", "use", "mod",
];

/// Outcome of a selection pass.
///
/// Mandatory items (the excerpt and explicit references) are always present,
/// even when they alone overflow the budget; [`Selection::into_items`] turns
/// that case into `Error::BudgetExceeded`.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub items: Vec<ContextItem>,
    /// Tokens of the excerpt plus explicit references.
    pub mandatory_tokens: usize,
    /// Tokens of everything chosen by score.
    pub supporting_tokens: usize,
    pub limit: usize,
}

impl Selection {
    pub fn exceeded(&self) -> bool {
        self.mandatory_tokens > self.limit
    }

    /// # Errors
    ///
    /// Returns `Error::BudgetExceeded` when mandatory items alone overflow the budget.
    pub fn into_items(self) -> Result<Vec<ContextItem>> {
        if self.exceeded() {
            return Err(Error::BudgetExceeded {
                required: self.mandatory_tokens,
                limit: self.limit,
            });
        }
        Ok(self.items)
    }
}

/// Scores and packs context candidates.
#[derive(Debug, Clone)]
pub struct ContextSelector {
    config: ContextConfig,
    stopwords: HashSet<String>,
    /// Unix seconds that recency is measured against.
    reference_time: i64,
}

impl ContextSelector {
    pub fn new(config: &ContextConfig) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let stopwords = STOPWORDS
            .iter()
            .map(|s| (*s).to_owned())
            .chain(config.extra_stopwords.iter().map(|s| s.to_lowercase()))
            .collect();
        Self {
            config: config.clone(),
            stopwords,
            reference_time: now,
        }
    }

    /// Pins the clock used for recency so selection is reproducible.
    pub fn at(mut self, unix_secs: i64) -> Self {
        self.reference_time = unix_secs;
        self
    }

    /// Chooses context for a request about `excerpt`.
    pub fn select(
        &self,
        excerpt: &str,
        library: &[ContextCandidate],
        history: &[ContextCandidate],
        budget: &ContextBudget,
    ) -> Selection {
        let limit = budget.limit();
        let doc_keywords = self.extract_keywords(excerpt);

        let mut items = Vec::new();
        let mut mandatory_tokens = 0;
        if !excerpt.trim().is_empty() {
            let tokens = estimate_tokens(excerpt);
            mandatory_tokens += tokens;
            items.push(ContextItem {
                kind: ContextKind::DocumentExcerpt,
                id: EXCERPT_ID.to_owned(),
                text: excerpt.to_owned(),
                tokens,
                relevance: 1.0,
                explicit: true,
            });
        }

        let max_usage = library
            .iter()
            .chain(history)
            .map(|c| c.usage_count)
            .max()
            .unwrap_or(0);
        let mut explicit = Vec::new();
        let mut scored = Vec::new();
        let tagged = library
            .iter()
            .map(|c| (ContextKind::LibraryPrompt, c))
            .chain(history.iter().map(|c| (ContextKind::HistoryEntry, c)));
        for (kind, candidate) in tagged {
            if candidate.text.trim().is_empty() {
                continue;
            }
            let item = ContextItem {
                kind,
                id: candidate.id.clone(),
                text: candidate.text.clone(),
                tokens: estimate_tokens(&candidate.text),
                relevance: self.score(candidate, &doc_keywords, max_usage),
                explicit: candidate.explicit,
            };
            if candidate.explicit {
                explicit.push(item);
            } else {
                scored.push(item);
            }
        }

        explicit.sort_by(|a, b| a.id.cmp(&b.id));
        mandatory_tokens += explicit.iter().map(|i| i.tokens).sum::<usize>();
        items.extend(explicit);

        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let available = limit.saturating_sub(mandatory_tokens);
        let mut supporting_tokens = 0;
        let mut taken = 0;
        for item in scored {
            if self.config.max_items.is_some_and(|max| taken >= max) {
                break;
            }
            if supporting_tokens + item.tokens > available {
                break;
            }
            supporting_tokens += item.tokens;
            taken += 1;
            items.push(item);
        }

        tracing::debug!(
            mandatory_tokens,
            supporting_tokens,
            limit,
            items = items.len(),
            "context selected"
        );
        Selection {
            items,
            mandatory_tokens,
            supporting_tokens,
            limit,
        }
    }

    /// Relevance of `candidate` to a document with `doc_keywords`, in 0.0..=1.0.
    fn score(
        &self,
        candidate: &ContextCandidate,
        doc_keywords: &HashMap<String, usize>,
        max_usage: u32,
    ) -> f64 {
        let w = &self.config.weights;
        let total = w.tags + w.keywords + w.recency + w.usage;
        if total <= 0.0 {
            return 0.0;
        }

        let tags = if candidate.tags.is_empty() {
            0.0
        } else {
            let hits = candidate
                .tags
                .iter()
                .filter(|t| doc_keywords.contains_key(&t.to_lowercase()))
                .count();
            hits as f64 / candidate.tags.len() as f64
        };

        let keywords = keyword_overlap(&self.extract_keywords(&candidate.text), doc_keywords);

        let recency = candidate.last_used.map_or(0.0, |t| {
            let age_hours = (self.reference_time - t).max(0) as f64 / 3600.0;
            let half_life = self.config.recency_half_life_hours.max(f64::EPSILON);
            0.5f64.powf(age_hours / half_life)
        });

        let usage = if max_usage == 0 {
            0.0
        } else {
            candidate.usage_count as f64 / max_usage as f64
        };

        ((w.tags * tags + w.keywords * keywords + w.recency * recency + w.usage * usage) / total)
            .clamp(0.0, 1.0)
    }

    /// Word frequencies of `content` after stripping markdown, stopwords,
    /// words shorter than three characters and mostly-numeric words.
    pub fn extract_keywords(&self, content: &str) -> HashMap<String, usize> {
        let lowered = content.to_lowercase();
        let text = CODE.replace_all(&lowered, " ");
        let text = LINK.replace_all(&text, " $1 ");
        let text = MARKUP.replace_all(&text, " ");
        let text = NON_WORD.replace_all(&text, " ");

        let mut frequency = HashMap::new();
        for word in text.split_whitespace() {
            if word.len() < 3 || self.stopwords.contains(word) || is_mostly_numeric(word) {
                continue;
            }
            *frequency.entry(word.to_owned()).or_insert(0) += 1;
        }
        frequency
    }

    /// The `n` most frequent keywords, ties broken alphabetically.
    pub fn top_keywords(frequency: &HashMap<String, usize>, n: usize) -> Vec<String> {
        let mut pairs: Vec<(&String, &usize)> = frequency.iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        pairs.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }
}

/// Shared keyword mass relative to the smaller side, in 0.0..=1.0.
fn keyword_overlap(a: &HashMap<String, usize>, b: &HashMap<String, usize>) -> f64 {
    let mass_a: usize = a.values().sum();
    let mass_b: usize = b.values().sum();
    let smaller = mass_a.min(mass_b);
    if smaller == 0 {
        return 0.0;
    }
    let shared: usize = a
        .iter()
        .filter_map(|(word, fa)| b.get(word).map(|fb| (*fa).min(*fb)))
        .sum();
    shared as f64 / smaller as f64
}

fn is_mostly_numeric(word: &str) -> bool {
    let digits = word.chars().filter(char::is_ascii_digit).count();
    digits > word.chars().count() / 2
}
