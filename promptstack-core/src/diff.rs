//! Line-based diff generation.
//!
//! The generator runs a Myers diff over lines (newlines kept, so applying a
//! generated diff reproduces the target byte for byte) and groups the changes
//! into hunks with a fixed context margin. The same module turns every kind of
//! suggestion proposal into a `Diff`.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::config::DiffConfig;
use crate::error::{Error, Result};
use crate::types::{
    split_lines, ContentHash, Diff, DiffLine, DiffLineKind, Edit, Hunk, Proposal, Suggestion,
};

static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

/// Computes structured diffs between two text versions.
#[derive(Debug, Clone)]
pub struct DiffGenerator {
    context_lines: usize,
    deadline: Duration,
}

impl Default for DiffGenerator {
    fn default() -> Self {
        Self::new(&DiffConfig::default())
    }
}

impl DiffGenerator {
    pub fn new(config: &DiffConfig) -> Self {
        Self {
            context_lines: config.context_lines,
            deadline: Duration::from_millis(config.deadline_ms),
        }
    }

    /// Diffs `original` against `modified`.
    ///
    /// Identical inputs give an empty diff. Inputs without a single shared line
    /// give one hunk replacing everything, without running the LCS search.
    pub fn generate(&self, original: &str, modified: &str) -> Diff {
        let origin_hash = ContentHash::of(original);
        let target_hash = ContentHash::of(modified);
        if original == modified {
            return Diff {
                origin_hash,
                target_hash,
                hunks: Vec::new(),
            };
        }

        let old_lines = split_lines(original);
        let new_lines = split_lines(modified);
        if shares_no_line(&old_lines, &new_lines) {
            tracing::debug!(
                old = old_lines.len(),
                new = new_lines.len(),
                "no common lines, emitting whole-file replacement"
            );
            return Diff {
                origin_hash,
                target_hash,
                hunks: vec![replace_all(old_lines, new_lines)],
            };
        }

        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .deadline(Instant::now() + self.deadline)
            .diff_lines(original, modified);

        let mut hunks = Vec::new();
        for group in diff.grouped_ops(self.context_lines) {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let origin_start = first.old_range().start;
            let target_start = first.new_range().start;
            let origin_len = last.old_range().end - origin_start;
            let target_len = last.new_range().end - target_start;

            let mut lines = Vec::new();
            for op in &group {
                for change in diff.iter_changes(op) {
                    let kind = match change.tag() {
                        ChangeTag::Equal => DiffLineKind::Context,
                        ChangeTag::Delete => DiffLineKind::Removed,
                        ChangeTag::Insert => DiffLineKind::Added,
                    };
                    lines.push(DiffLine::new(kind, change.value()));
                }
            }
            hunks.push(Hunk {
                origin_start,
                origin_len,
                target_start,
                target_len,
                lines,
            });
        }

        tracing::debug!(hunks = hunks.len(), "diff generated");
        Diff {
            origin_hash,
            target_hash,
            hunks,
        }
    }

    /// Turns a suggestion into a diff against `original`, the text the
    /// suggestion was requested for.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEdit` for edits that do not match `original`, and
    /// the patch errors of [`parse_unified`] for unified patches.
    pub fn for_suggestion(&self, suggestion: &Suggestion, original: &str) -> Result<Diff> {
        match &suggestion.proposal {
            Proposal::Content(content) => Ok(self.generate(original, content)),
            Proposal::Edits(edits) => {
                let modified = apply_edits(original, edits)?;
                Ok(self.generate(original, &modified))
            }
            Proposal::Patch(patch) => parse_unified(patch, original),
        }
    }
}

impl Suggestion {
    /// Shorthand for [`DiffGenerator::for_suggestion`].
    pub fn to_diff(&self, original: &str, generator: &DiffGenerator) -> Result<Diff> {
        generator.for_suggestion(self, original)
    }
}

fn shares_no_line(old: &[String], new: &[String]) -> bool {
    if old.is_empty() || new.is_empty() {
        return true;
    }
    let seen: HashSet<&str> = old.iter().map(String::as_str).collect();
    !new.iter().any(|l| seen.contains(l.as_str()))
}

fn replace_all(old: Vec<String>, new: Vec<String>) -> Hunk {
    let origin_len = old.len();
    let target_len = new.len();
    let lines = old
        .into_iter()
        .map(|l| DiffLine::new(DiffLineKind::Removed, l))
        .chain(new.into_iter().map(|l| DiffLine::new(DiffLineKind::Added, l)))
        .collect();
    Hunk {
        origin_start: 0,
        origin_len,
        target_start: 0,
        target_len,
        lines,
    }
}

/// Applies every hunk of `diff` to `origin`, requiring an exact match.
///
/// This is the pure counterpart of the document applier: no conflicts, no
/// partial application.
///
/// # Errors
///
/// Returns `Error::InvalidDiffFormat` for inconsistent hunks or hunks whose
/// expected lines are not found, and `Error::OutOfRangeLineNumbers` for
/// ranges past the end of `origin`.
pub fn patch(origin: &str, diff: &Diff) -> Result<String> {
    let mut lines = split_lines(origin);
    let mut offset: isize = 0;
    let mut previous_end = 0;
    for (hunk_index, hunk) in diff.hunks.iter().enumerate() {
        if let Some(detail) = hunk.inconsistency() {
            return Err(Error::InvalidDiffFormat { hunk_index, detail });
        }
        if hunk.origin_start < previous_end {
            return Err(Error::InvalidDiffFormat {
                hunk_index,
                detail: "hunks overlap or are out of order".to_owned(),
            });
        }
        previous_end = hunk.origin_end();
        let start = (hunk.origin_start as isize + offset) as usize;
        let end = start + hunk.origin_len;
        if end > lines.len() {
            return Err(Error::OutOfRangeLineNumbers {
                hunk_index,
                start: hunk.origin_start,
                end: hunk.origin_end(),
                line_count: lines.len(),
            });
        }
        let expected = hunk.expected_lines();
        if lines[start..end]
            .iter()
            .map(String::as_str)
            .ne(expected.iter().copied())
        {
            return Err(Error::InvalidDiffFormat {
                hunk_index,
                detail: format!("expected lines not found at line {}", hunk.origin_start + 1),
            });
        }
        lines.splice(start..end, hunk.target_lines());
        offset += hunk.line_delta();
    }
    Ok(lines.concat())
}

/// Parses a unified patch into a `Diff` against `origin`.
///
/// File headers and prose before the first `@@` line are ignored. A hunk ends
/// once the line counts in its header are met, and anything after it up to
/// the next `@@` is skipped. A body that stops short of its header counts
/// keeps the lengths it actually has.
///
/// # Errors
///
/// Returns `Error::InvalidDiffFormat` if the patch has no hunks or a hunk
/// starts with a line that is not part of a patch body, and any error of
/// [`patch`] if it does not apply to `origin`.
pub fn parse_unified(text: &str, origin: &str) -> Result<Diff> {
    let mut hunks: Vec<Hunk> = Vec::new();
    // Header counts of the hunk still collecting body lines.
    let mut open: Option<(usize, usize)> = None;
    let mut after_body_line = false;

    for raw in text.lines() {
        if let Some(caps) = HUNK_HEADER.captures(raw) {
            let number = |i: usize, default: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(default)
            };
            let (old_start, old_len) = (number(1, 1), number(2, 1));
            let (new_start, new_len) = (number(3, 1), number(4, 1));
            hunks.push(Hunk {
                origin_start: if old_len == 0 {
                    old_start
                } else {
                    old_start.saturating_sub(1)
                },
                origin_len: 0,
                target_start: if new_len == 0 {
                    new_start
                } else {
                    new_start.saturating_sub(1)
                },
                target_len: 0,
                lines: Vec::new(),
            });
            open = Some((old_len, new_len));
            after_body_line = false;
            continue;
        }

        let hunk_index = hunks.len().saturating_sub(1);
        let Some(hunk) = hunks.last_mut() else {
            continue;
        };
        if raw.starts_with('\\') {
            if after_body_line {
                if let Some(last) = hunk.lines.last_mut() {
                    if last.content.ends_with('\n') {
                        last.content.pop();
                    }
                }
            }
            after_body_line = false;
            continue;
        }
        after_body_line = false;
        let Some((old_len, new_len)) = open else {
            continue;
        };

        let (kind, content) = match raw.chars().next() {
            Some('+') => (DiffLineKind::Added, &raw[1..]),
            Some('-') => (DiffLineKind::Removed, &raw[1..]),
            Some(' ') => (DiffLineKind::Context, &raw[1..]),
            None => (DiffLineKind::Context, ""),
            Some(_) if !hunk.lines.is_empty() => {
                open = None;
                continue;
            }
            Some(_) => {
                return Err(Error::InvalidDiffFormat {
                    hunk_index,
                    detail: format!("unexpected patch line {raw:?}"),
                });
            }
        };
        match kind {
            DiffLineKind::Added => hunk.target_len += 1,
            DiffLineKind::Removed => hunk.origin_len += 1,
            DiffLineKind::Context => {
                hunk.origin_len += 1;
                hunk.target_len += 1;
            }
        }
        hunk.lines.push(DiffLine::new(kind, format!("{content}\n")));
        after_body_line = true;
        if hunk.origin_len >= old_len && hunk.target_len >= new_len {
            open = None;
        }
    }

    if hunks.is_empty() {
        return Err(Error::InvalidDiffFormat {
            hunk_index: 0,
            detail: "patch contains no hunks".to_owned(),
        });
    }

    let mut diff = Diff {
        origin_hash: ContentHash::of(origin),
        target_hash: ContentHash::of(origin),
        hunks,
    };
    let target = patch(origin, &diff)?;
    diff.target_hash = ContentHash::of(&target);
    Ok(diff)
}

/// Applies positional edits to `original` and returns the edited text.
///
/// Positions refer to `original`, not to the text after earlier edits; edits
/// are applied in line/column order and may not overlap.
///
/// # Errors
///
/// Returns `Error::InvalidEdit` if a position is out of bounds, the text at a
/// position differs from `old_content`, or two edits overlap.
pub fn apply_edits(original: &str, edits: &[Edit]) -> Result<String> {
    let mut located = Vec::with_capacity(edits.len());
    for edit in edits {
        let Some(start) = byte_offset(original, edit.line, edit.column) else {
            return Err(Error::InvalidEdit {
                line: edit.line,
                column: edit.column,
                detail: "position out of bounds".to_owned(),
            });
        };
        let end = start + edit.old_content.len();
        if original.get(start..end) != Some(edit.old_content.as_str()) {
            return Err(Error::InvalidEdit {
                line: edit.line,
                column: edit.column,
                detail: format!("expected {:?}", edit.old_content),
            });
        }
        located.push((start, end, edit));
    }
    located.sort_by_key(|(start, end, _)| (*start, *end));

    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;
    for (start, end, edit) in located {
        if start < cursor {
            return Err(Error::InvalidEdit {
                line: edit.line,
                column: edit.column,
                detail: "overlaps a previous edit".to_owned(),
            });
        }
        out.push_str(&original[cursor..start]);
        out.push_str(&edit.new_content);
        cursor = end;
    }
    out.push_str(&original[cursor..]);
    Ok(out)
}

/// Byte offset of 1-based (`line`, `column`), counting columns in characters.
fn byte_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let mut line_start = 0;
    for _ in 1..line {
        line_start += text[line_start..].find('\n')? + 1;
    }
    let rest = &text[line_start..];
    let line_text = rest.split_inclusive('\n').next().unwrap_or("");
    let line_body = line_text.strip_suffix('\n').unwrap_or(line_text);
    let col = column - 1;
    if col == line_body.chars().count() {
        return Some(line_start + line_body.len());
    }
    line_body.char_indices().nth(col).map(|(i, _)| line_start + i)
}
