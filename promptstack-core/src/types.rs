use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque identity of a document registered with the application queue.
///
/// Backed by a UUID v4. Ids are minted when a session opens a document and are
/// never reused, so a stale id can only ever produce `UnknownDocument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single enqueued application request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 of a text version.
///
/// Diffs record the hash of the text they were computed from, never a reference
/// to it. Conflict detection compares this value with the live document.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes `text` as a whole.
    pub fn of(text: &str) -> Self {
        Self(Sha256::digest(text.as_bytes()).into())
    }

    /// Hashes the concatenation of `lines` without joining them first.
    ///
    /// Lines carry their own terminators, so `of_lines(split(t)) == of(t)`.
    pub fn of_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for line in lines {
            hasher.update(line.as_ref().as_bytes());
        }
        Self(hasher.finalize().into())
    }

    /// First 12 hex digits, enough to tell versions apart in logs.
    pub fn short(&self) -> String {
        self.to_string()[..12].to_owned()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Splits text into lines that keep their `\n` terminator.
///
/// Concatenating the result reproduces `text` byte for byte; a final line
/// without a newline is kept as-is.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_owned).collect()
}

/// The type of change for a diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
}

impl DiffLineKind {
    /// Unified-diff origin character: `'+'`, `'-'` or `' '`.
    pub fn origin(self) -> char {
        match self {
            DiffLineKind::Added => '+',
            DiffLineKind::Removed => '-',
            DiffLineKind::Context => ' ',
        }
    }
}

/// A single line within a diff hunk with change type.
///
/// `content` includes the trailing newline when the source line had one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
}

impl DiffLine {
    pub fn new(kind: DiffLineKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// One contiguous block of a diff.
///
/// Starts are 0-based line indices into the origin and target texts. The hunk
/// is internally consistent when `origin_len` equals the number of context and
/// removed lines and `target_len` equals the number of context and added lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hunk {
    pub origin_start: usize,
    pub origin_len: usize,
    pub target_start: usize,
    pub target_len: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// Lines the hunk expects to find in the origin: context and removed, in order.
    pub fn expected_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Added)
            .map(|l| l.content.as_str())
            .collect()
    }

    /// Lines the hunk leaves behind: context and added, in order.
    pub fn target_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Removed)
            .map(|l| l.content.clone())
            .collect()
    }

    /// Exclusive end of the origin range.
    pub fn origin_end(&self) -> usize {
        self.origin_start + self.origin_len
    }

    /// Net change in line count when this hunk is applied.
    pub fn line_delta(&self) -> isize {
        self.target_len as isize - self.origin_len as isize
    }

    /// Returns a description of the first inconsistency between the declared
    /// lengths and the carried lines, or `None` when the hunk is well formed.
    pub fn inconsistency(&self) -> Option<String> {
        let expected = self
            .lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Added)
            .count();
        let target = self
            .lines
            .iter()
            .filter(|l| l.kind != DiffLineKind::Removed)
            .count();
        if expected != self.origin_len {
            return Some(format!(
                "origin length {} but hunk carries {} context/removed lines",
                self.origin_len, expected
            ));
        }
        if target != self.target_len {
            return Some(format!(
                "target length {} but hunk carries {} context/added lines",
                self.target_len, target
            ));
        }
        if self.lines.iter().all(|l| l.kind == DiffLineKind::Context) {
            return Some("hunk contains no changes".to_owned());
        }
        None
    }

    /// The `@@ -a,b +c,d @@` header with 1-based starts.
    ///
    /// An empty range is anchored on the line before it, as in `diff -u`.
    pub fn header(&self) -> String {
        fn anchor(start: usize, len: usize) -> usize {
            if len == 0 { start } else { start + 1 }
        }
        format!(
            "@@ -{},{} +{},{} @@",
            anchor(self.origin_start, self.origin_len),
            self.origin_len,
            anchor(self.target_start, self.target_len),
            self.target_len
        )
    }
}

/// An ordered sequence of hunks between two text versions identified by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub origin_hash: ContentHash,
    pub target_hash: ContentHash,
    pub hunks: Vec<Hunk>,
}

/// Per-diff line statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub hunks: usize,
    pub added: usize,
    pub removed: usize,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn hunk_count(&self) -> usize {
        self.hunks.len()
    }

    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats {
            hunks: self.hunks.len(),
            ..DiffStats::default()
        };
        for line in self.hunks.iter().flat_map(|h| &h.lines) {
            match line.kind {
                DiffLineKind::Added => stats.added += 1,
                DiffLineKind::Removed => stats.removed += 1,
                DiffLineKind::Context => {}
            }
        }
        stats
    }

    /// The diff that takes the target back to the origin.
    ///
    /// Added and removed lines swap roles, as do the origin and target ranges
    /// and hashes.
    pub fn invert(&self) -> Diff {
        let hunks = self
            .hunks
            .iter()
            .map(|h| Hunk {
                origin_start: h.target_start,
                origin_len: h.target_len,
                target_start: h.origin_start,
                target_len: h.origin_len,
                lines: h
                    .lines
                    .iter()
                    .map(|l| DiffLine {
                        kind: match l.kind {
                            DiffLineKind::Added => DiffLineKind::Removed,
                            DiffLineKind::Removed => DiffLineKind::Added,
                            DiffLineKind::Context => DiffLineKind::Context,
                        },
                        content: l.content.clone(),
                    })
                    .collect(),
            })
            .collect();
        Diff {
            origin_hash: self.target_hash,
            target_hash: self.origin_hash,
            hunks,
        }
    }

    /// Renders the diff as unified text.
    ///
    /// Lines without a trailing newline are followed by the conventional
    /// `\ No newline at end of file` marker.
    pub fn to_unified(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            out.push_str(&hunk.header());
            out.push('\n');
            for line in &hunk.lines {
                out.push(line.kind.origin());
                out.push_str(&line.content);
                if !line.content.ends_with('\n') {
                    out.push_str("\n\\ No newline at end of file\n");
                }
            }
        }
        out
    }
}

/// Why a hunk could not be applied as computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// The lines the hunk expects differ from the current document.
    ContentChanged,
    /// The hunk's range falls outside the current document.
    OutOfRange,
    /// A hunk applied earlier in the same request already touched these lines.
    Overlapping,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictKind::ContentChanged => "content-changed",
            ConflictKind::OutOfRange => "out-of-range",
            ConflictKind::Overlapping => "overlapping",
        })
    }
}

/// A mismatch between a hunk and the live document, awaiting caller resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub hunk_index: usize,
    pub kind: ConflictKind,
    pub detail: String,
}

/// Category of an AI suggestion, as the provider labels it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    /// Pull in or reword material from the library.
    #[default]
    Recommendation,
    /// Missing context or information.
    Gap,
    /// Structure or organisation.
    Formatting,
    /// Conflicting instructions.
    Contradiction,
    /// Unclear or ambiguous wording.
    Clarity,
    /// Alternative overall structure.
    Reformatting,
}

impl SuggestionKind {
    /// Lenient lookup used by the parser; unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "recommendation" => Some(Self::Recommendation),
            "gap" => Some(Self::Gap),
            "formatting" => Some(Self::Formatting),
            "contradiction" => Some(Self::Contradiction),
            "clarity" => Some(Self::Clarity),
            "reformatting" => Some(Self::Reformatting),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Recommendation => "Recommendation",
            Self::Gap => "Gap Analysis",
            Self::Formatting => "Formatting",
            Self::Contradiction => "Contradiction",
            Self::Clarity => "Clarity",
            Self::Reformatting => "Reformatting",
        }
    }
}

/// A positional replacement as carried by JSON suggestion responses.
///
/// `line` and `column` are 1-based; `old_content` must be found verbatim at
/// that position for the edit to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub line: usize,
    pub column: usize,
    pub old_content: String,
    pub new_content: String,
}

/// What the provider proposes to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// The whole document as it should read afterwards.
    Content(String),
    /// A unified patch against the document the suggestion was requested for.
    Patch(String),
    /// Positional edits against that document.
    Edits(Vec<Edit>),
}

/// The atomic unit returned by the provider.
///
/// Independent of how the document evolves until it is turned into a diff and
/// applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub id: String,
    pub kind: SuggestionKind,
    pub title: String,
    pub summary: String,
    pub rationale: String,
    pub proposal: Proposal,
}

/// Where a piece of supporting context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    LibraryPrompt,
    HistoryEntry,
    DocumentExcerpt,
}

/// A candidate offered to the context selector by a library or history source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextCandidate {
    pub id: String,
    pub text: String,
    pub tags: Vec<String>,
    /// Unix seconds of the last use, if the source tracks it.
    pub last_used: Option<i64>,
    pub usage_count: u32,
    /// Explicitly referenced by the user; always selected.
    pub explicit: bool,
}

/// One selected piece of context, produced fresh per selection call.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub kind: ContextKind,
    pub id: String,
    pub text: String,
    pub tokens: usize,
    /// 0.0 to 1.0, higher is more relevant.
    pub relevance: f64,
    pub explicit: bool,
}
