//! Diff application, conflict detection and resolution.
//!
//! A [`Transaction`] applies one request to a working copy of a document's
//! lines, one hunk per [`Transaction::step`]. Between steps it may pause on a
//! hunk that needs a caller decision. The document itself is only touched by
//! [`Transaction::commit`], so dropping a transaction at any checkpoint leaves
//! it exactly as it was.

use std::collections::{BTreeSet, VecDeque};

use crate::document::{AppliedSpan, Document};
use crate::error::{Error, Result};
use crate::types::{
    split_lines, Conflict, ConflictKind, ContentHash, Diff, DocumentId, Hunk, RequestId,
};

/// Which hunks of a diff a request applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ApplyMode {
    #[default]
    All,
    /// Only the listed hunk indices; the rest are reported as not selected.
    Selected(BTreeSet<usize>),
    /// Every hunk waits for a caller decision, conflicting or not.
    HunkByHunk,
}

/// What to do when the document no longer matches the diff's origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Reject the whole request with `StaleDiff`.
    Strict,
    /// Apply what still fits and block on conflicting hunks.
    #[default]
    Resolve,
}

/// A caller decision for a blocked hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the hunk's span with its target lines as computed.
    UseDiff,
    /// Keep the document as it is and skip the hunk.
    UseCurrent,
    /// Replace the hunk's span with caller-supplied text.
    Merge(String),
}

#[derive(Debug, Clone)]
pub struct ApplicationRequest {
    pub id: RequestId,
    pub document_id: DocumentId,
    pub diff: Diff,
    pub mode: ApplyMode,
    pub policy: ConflictPolicy,
}

impl ApplicationRequest {
    pub fn new(document_id: DocumentId, diff: Diff) -> Self {
        Self {
            id: RequestId::new(),
            document_id,
            diff,
            mode: ApplyMode::All,
            policy: ConflictPolicy::Resolve,
        }
    }

    pub fn selected(mut self, hunks: impl IntoIterator<Item = usize>) -> Self {
        self.mode = ApplyMode::Selected(hunks.into_iter().collect());
        self
    }

    pub fn hunk_by_hunk(mut self) -> Self {
        self.mode = ApplyMode::HunkByHunk;
        self
    }

    pub fn policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn is_selected(&self, index: usize) -> bool {
        match &self.mode {
            ApplyMode::Selected(set) => set.contains(&index),
            ApplyMode::All | ApplyMode::HunkByHunk => true,
        }
    }
}

/// Why a hunk was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotSelected,
    /// Failed validation; the text is the validation error.
    Invalid(String),
    /// The caller chose to keep the current text.
    KeptCurrent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkOutcome {
    Applied,
    /// Applied as computed despite a conflict.
    Forced,
    /// Replaced with caller-supplied text.
    Merged,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkReport {
    pub index: usize,
    pub outcome: HunkOutcome,
    /// The conflict the hunk was blocked on, if any.
    pub conflict: Option<Conflict>,
}

/// Manifest of a completed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub request_id: RequestId,
    pub document_id: DocumentId,
    pub hash_before: ContentHash,
    pub hash_after: ContentHash,
    /// One entry per hunk of the diff, in hunk index order.
    pub hunks: Vec<HunkReport>,
}

impl ApplyReport {
    /// Hunks that changed the document, however they were decided.
    pub fn changed(&self) -> usize {
        self.hunks
            .iter()
            .filter(|h| {
                matches!(
                    h.outcome,
                    HunkOutcome::Applied | HunkOutcome::Forced | HunkOutcome::Merged
                )
            })
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &HunkReport> {
        self.hunks
            .iter()
            .filter(|h| matches!(h.outcome, HunkOutcome::Skipped(_)))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.hunks.iter().filter_map(|h| h.conflict.as_ref())
    }
}

/// A hunk waiting for a caller decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecision {
    pub hunk_index: usize,
    /// `None` for a clean hunk blocked by hunk-by-hunk mode.
    pub conflict: Option<Conflict>,
}

/// Result of one [`Transaction::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A hunk was applied to the working copy; this is a checkpoint.
    Applied { hunk_index: usize },
    /// The transaction waits for [`Transaction::resolve`].
    Blocked(PendingDecision),
    /// No hunks remain; call [`Transaction::commit`].
    Done,
}

/// One application request in progress against a working copy.
#[derive(Debug)]
pub struct Transaction {
    request: ApplicationRequest,
    hash_before: ContentHash,
    stale: bool,
    lines: Vec<String>,
    cursor: usize,
    order: VecDeque<usize>,
    offset: isize,
    applied_until: usize,
    spans: Vec<AppliedSpan>,
    reports: Vec<Option<HunkReport>>,
    pending: Option<PendingDecision>,
}

impl Transaction {
    /// Validates `request` against the current `document` and prepares a
    /// working copy.
    ///
    /// Invalid selected hunks are skipped and reported.
    ///
    /// # Errors
    ///
    /// - `Error::StaleDiff` when the document moved on and the policy is strict.
    /// - The validation error of the first invalid hunk when no valid selected
    ///   hunk remains.
    pub fn begin(document: &Document, request: ApplicationRequest) -> Result<Self> {
        let hash_before = document.hash();
        let stale = hash_before != request.diff.origin_hash;
        let lines = document.lines();

        if stale && request.policy == ConflictPolicy::Strict {
            let conflicts = scan_conflicts(lines, &request);
            tracing::info!(
                request = %request.id,
                conflicts = conflicts.len(),
                "stale diff rejected under strict policy"
            );
            return Err(Error::StaleDiff {
                expected: request.diff.origin_hash,
                actual: hash_before,
                conflicts,
            });
        }

        let hunk_count = request.diff.hunks.len();
        let mut reports: Vec<Option<HunkReport>> = vec![None; hunk_count];
        let mut valid = Vec::new();
        let mut first_invalid: Option<Error> = None;
        let mut selected_any = false;

        if let ApplyMode::Selected(set) = &request.mode {
            for missing in set.iter().filter(|i| **i >= hunk_count) {
                tracing::warn!(
                    request = %request.id,
                    hunk = missing,
                    "selected hunk does not exist"
                );
            }
        }

        for (index, hunk) in request.diff.hunks.iter().enumerate() {
            if !request.is_selected(index) {
                reports[index] = Some(skipped(index, SkipReason::NotSelected));
                continue;
            }
            selected_any = true;
            match validate(index, hunk, lines, stale) {
                Ok(()) => valid.push(index),
                Err(e) => {
                    tracing::debug!(
                        request = %request.id,
                        hunk = index,
                        error = %e,
                        "skipping invalid hunk"
                    );
                    reports[index] = Some(skipped(index, SkipReason::Invalid(e.to_string())));
                    first_invalid.get_or_insert(e);
                }
            }
        }

        if selected_any && valid.is_empty() {
            if let Some(e) = first_invalid {
                return Err(e);
            }
        }

        valid.sort_by_key(|i| request.diff.hunks[*i].origin_start);
        Ok(Self {
            hash_before,
            stale,
            lines: lines.to_vec(),
            cursor: document.cursor(),
            order: valid.into(),
            offset: 0,
            applied_until: 0,
            spans: Vec::new(),
            reports,
            pending: None,
            request,
        })
    }

    pub fn request(&self) -> &ApplicationRequest {
        &self.request
    }

    /// Whether the document differed from the diff's origin at `begin`.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    /// Hunks still to be considered, excluding a pending one.
    pub fn remaining(&self) -> usize {
        self.order.len()
    }

    /// Advances by one hunk.
    ///
    /// While a decision is pending this keeps returning `Step::Blocked`.
    pub fn step(&mut self) -> Step {
        if let Some(pending) = &self.pending {
            return Step::Blocked(pending.clone());
        }
        let Some(index) = self.order.pop_front() else {
            return Step::Done;
        };
        let hunk = &self.request.diff.hunks[index];
        let conflict = self.check(index, hunk);
        if conflict.is_some() || self.request.mode == ApplyMode::HunkByHunk {
            let pending = PendingDecision {
                hunk_index: index,
                conflict,
            };
            tracing::debug!(
                request = %self.request.id,
                hunk = index,
                conflict = ?pending.conflict,
                "hunk blocked"
            );
            self.pending = Some(pending.clone());
            return Step::Blocked(pending);
        }

        let start = self.position(hunk).unwrap_or(0);
        let (origin_len, origin_end) = (hunk.origin_len, hunk.origin_end());
        let target = hunk.target_lines();
        self.splice(start, origin_len, target, origin_end);
        self.reports[index] = Some(HunkReport {
            index,
            outcome: HunkOutcome::Applied,
            conflict: None,
        });
        tracing::debug!(request = %self.request.id, hunk = index, "hunk applied");
        Step::Applied { hunk_index: index }
    }

    /// Settles the pending decision for `hunk_index`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidResolution` if no decision is pending for that
    /// hunk, or for `UseDiff` on an out-of-range conflict. The transaction
    /// stays blocked on error.
    pub fn resolve(&mut self, hunk_index: usize, resolution: Resolution) -> Result<()> {
        let pending = self.pending.as_ref();
        let Some(pending) = pending.filter(|p| p.hunk_index == hunk_index) else {
            return Err(Error::InvalidResolution {
                hunk_index,
                detail: "no decision pending for this hunk".to_owned(),
            });
        };
        let conflict = pending.conflict.clone();
        if resolution == Resolution::UseDiff
            && conflict.as_ref().is_some_and(|c| c.kind == ConflictKind::OutOfRange)
        {
            return Err(Error::InvalidResolution {
                hunk_index,
                detail: "the hunk's lines are outside the document; use-current or merge"
                    .to_owned(),
            });
        }

        let hunk = &self.request.diff.hunks[hunk_index];
        let (origin_len, origin_end) = (hunk.origin_len, hunk.origin_end());
        let outcome = match resolution {
            Resolution::UseDiff => {
                let start = self.position(hunk).unwrap_or(0);
                let target = hunk.target_lines();
                self.splice(start, origin_len, target, origin_end);
                if conflict.is_some() {
                    HunkOutcome::Forced
                } else {
                    HunkOutcome::Applied
                }
            }
            Resolution::UseCurrent => HunkOutcome::Skipped(SkipReason::KeptCurrent),
            Resolution::Merge(text) => {
                // A start before the working copy means earlier hunks removed it.
                let len = self.lines.len();
                let start = self.position(hunk).unwrap_or(len).min(len);
                let remove = origin_len.min(len - start);
                self.splice(start, remove, split_lines(&text), origin_end);
                HunkOutcome::Merged
            }
        };
        tracing::debug!(
            request = %self.request.id,
            hunk = hunk_index,
            outcome = ?outcome,
            "hunk resolved"
        );
        self.reports[hunk_index] = Some(HunkReport {
            index: hunk_index,
            outcome,
            conflict,
        });
        self.pending = None;
        Ok(())
    }

    /// Installs the working copy into `document` and returns the manifest.
    ///
    /// Records an undo entry unless nothing changed.
    pub fn commit(self, document: &mut Document) -> ApplyReport {
        let hunks = self
            .reports
            .into_iter()
            .enumerate()
            .map(|(index, report)| {
                report.unwrap_or_else(|| {
                    skipped(index, SkipReason::Invalid("not reached".to_owned()))
                })
            })
            .collect();
        document.commit(self.lines, self.spans, self.cursor);
        ApplyReport {
            request_id: self.request.id,
            document_id: self.request.document_id,
            hash_before: self.hash_before,
            hash_after: document.hash(),
            hunks,
        }
    }

    /// Working-copy line index of `hunk`'s origin start, if not negative.
    fn position(&self, hunk: &Hunk) -> Option<usize> {
        usize::try_from(hunk.origin_start as isize + self.offset).ok()
    }

    fn check(&self, index: usize, hunk: &Hunk) -> Option<Conflict> {
        let conflict = |kind, detail: String| {
            Some(Conflict {
                hunk_index: index,
                kind,
                detail,
            })
        };
        let fits = |s: &usize| s + hunk.origin_len <= self.lines.len();
        let Some(start) = self.position(hunk).filter(fits) else {
            return conflict(
                ConflictKind::OutOfRange,
                format!(
                    "lines {}..{} past end of document ({} lines)",
                    hunk.origin_start,
                    hunk.origin_end(),
                    self.lines.len()
                ),
            );
        };
        if hunk.origin_start < self.applied_until {
            return conflict(
                ConflictKind::Overlapping,
                format!("starts at line {} inside a hunk already applied", hunk.origin_start),
            );
        }
        let expected = ContentHash::of_lines(&hunk.expected_lines());
        let current = ContentHash::of_lines(&self.lines[start..start + hunk.origin_len]);
        if expected != current {
            return conflict(
                ConflictKind::ContentChanged,
                format!("lines {}..{} no longer match", start, start + hunk.origin_len),
            );
        }
        None
    }

    fn splice(&mut self, start: usize, remove: usize, insert: Vec<String>, origin_end: usize) {
        let end = start + remove;
        let removed: Vec<String> = self
            .lines
            .splice(start..end, insert.iter().cloned())
            .collect();
        let delta = insert.len() as isize - removed.len() as isize;
        if self.cursor >= end {
            self.cursor = (self.cursor as isize + delta).max(start as isize) as usize;
        } else if self.cursor > start {
            self.cursor = start;
        }
        self.offset += delta;
        self.applied_until = self.applied_until.max(origin_end);
        self.spans.push(AppliedSpan {
            start,
            removed,
            inserted: insert,
        });
    }
}

fn skipped(index: usize, reason: SkipReason) -> HunkReport {
    HunkReport {
        index,
        outcome: HunkOutcome::Skipped(reason),
        conflict: None,
    }
}

/// Per-hunk checks against the document as it is now.
///
/// Content and range checks only make sense when the document is the diff's
/// origin; on a stale document they become conflicts instead.
fn validate(index: usize, hunk: &Hunk, lines: &[String], stale: bool) -> Result<()> {
    if let Some(detail) = hunk.inconsistency() {
        return Err(Error::InvalidDiffFormat {
            hunk_index: index,
            detail,
        });
    }
    if stale {
        return Ok(());
    }
    if hunk.origin_end() > lines.len() {
        return Err(Error::OutOfRangeLineNumbers {
            hunk_index: index,
            start: hunk.origin_start,
            end: hunk.origin_end(),
            line_count: lines.len(),
        });
    }
    let current = &lines[hunk.origin_start..hunk.origin_end()];
    if current.iter().map(String::as_str).ne(hunk.expected_lines()) {
        return Err(Error::InvalidDiffFormat {
            hunk_index: index,
            detail: format!("expected lines not found at line {}", hunk.origin_start + 1),
        });
    }
    Ok(())
}

/// Conflicts a stale request would hit, assuming every clean hunk applies.
fn scan_conflicts(lines: &[String], request: &ApplicationRequest) -> Vec<Conflict> {
    let mut offset: isize = 0;
    let mut conflicts = Vec::new();
    for (index, hunk) in request.diff.hunks.iter().enumerate() {
        if !request.is_selected(index) || hunk.inconsistency().is_some() {
            continue;
        }
        let start = hunk.origin_start as isize + offset;
        let in_range = start >= 0 && start as usize + hunk.origin_len <= lines.len();
        if !in_range {
            conflicts.push(Conflict {
                hunk_index: index,
                kind: ConflictKind::OutOfRange,
                detail: format!(
                    "lines {}..{} past end of document",
                    hunk.origin_start,
                    hunk.origin_end()
                ),
            });
            continue;
        }
        let start = start as usize;
        let current = &lines[start..start + hunk.origin_len];
        if ContentHash::of_lines(current) != ContentHash::of_lines(&hunk.expected_lines()) {
            conflicts.push(Conflict {
                hunk_index: index,
                kind: ConflictKind::ContentChanged,
                detail: format!("lines {}..{} no longer match", start, start + hunk.origin_len),
            });
            continue;
        }
        offset += hunk.line_delta();
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffGenerator;
    use crate::types::{DiffLine, DiffLineKind};

    fn diff(original: &str, modified: &str) -> Diff {
        DiffGenerator::default().generate(original, modified)
    }

    fn begin(doc: &Document, diff: Diff) -> Transaction {
        let request = ApplicationRequest::new(doc.id(), diff);
        Transaction::begin(doc, request).unwrap()
    }

    fn run(doc: &mut Document, request: ApplicationRequest) -> Result<ApplyReport> {
        let mut txn = Transaction::begin(doc, request)?;
        loop {
            match txn.step() {
                Step::Applied { .. } => {}
                Step::Blocked(p) => panic!("unexpected block on {p:?}"),
                Step::Done => return Ok(txn.commit(doc)),
            }
        }
    }

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("line {i}\n")).collect()
    }

    /// `original` with lines 2 and 15 upper-cased: two separate hunks.
    fn two_changes(original: &str) -> String {
        original
            .replace("line 2\n", "LINE 2\n")
            .replace("line 15\n", "LINE 15\n")
    }

    fn hunk(start: usize, removed: &[&str], added: &[&str]) -> Hunk {
        let line = |kind, l: &&str| DiffLine::new(kind, format!("{l}\n"));
        let lines = removed
            .iter()
            .map(|l| line(DiffLineKind::Removed, l))
            .chain(added.iter().map(|l| line(DiffLineKind::Added, l)))
            .collect();
        Hunk {
            origin_start: start,
            origin_len: removed.len(),
            target_start: start,
            target_len: added.len(),
            lines,
        }
    }

    fn hand_built(origin: &str, hunks: Vec<Hunk>) -> Diff {
        Diff {
            origin_hash: ContentHash::of(origin),
            target_hash: ContentHash::of(origin),
            hunks,
        }
    }

    #[test]
    fn clean_apply_reaches_target() {
        let original = numbered(20);
        let modified = two_changes(&original);
        let d = diff(&original, &modified);
        assert_eq!(d.hunk_count(), 2);
        let mut doc = Document::new(&original);
        let id = doc.id();
        let report = run(&mut doc, ApplicationRequest::new(id, d.clone())).unwrap();
        assert_eq!(doc.text(), modified);
        assert_eq!(report.hash_after, d.target_hash);
        assert_eq!(report.changed(), 2);
        assert_eq!(doc.undo_depth(), 1);
    }

    #[test]
    fn selected_hunks_only() {
        let original = numbered(20);
        let modified = two_changes(&original);
        let mut doc = Document::new(&original);
        let d = diff(&original, &modified);
        let request = ApplicationRequest::new(doc.id(), d).selected([0]);
        let report = run(&mut doc, request).unwrap();
        assert_eq!(doc.text(), original.replace("line 2\n", "LINE 2\n"));
        assert_eq!(
            report.hunks[1].outcome,
            HunkOutcome::Skipped(SkipReason::NotSelected)
        );
    }

    #[test]
    fn later_hunks_shift_by_earlier_deltas() {
        let original = numbered(20);
        let modified = original
            .replace("line 1\n", "line 1\nextra a\nextra b\n")
            .replace("line 16\n", "");
        let mut doc = Document::new(&original);
        let request = ApplicationRequest::new(doc.id(), diff(&original, &modified));
        run(&mut doc, request).unwrap();
        assert_eq!(doc.text(), modified);
    }

    #[test]
    fn empty_diff_is_a_no_op() {
        let mut doc = Document::new("same\n");
        let id = doc.id();
        let request = ApplicationRequest::new(id, diff("same\n", "same\n"));
        let report = run(&mut doc, request).unwrap();
        assert!(report.hunks.is_empty());
        assert_eq!(report.hash_before, report.hash_after);
        assert_eq!(doc.undo_depth(), 0);
    }

    #[test]
    fn invalid_hunks_are_skipped_when_others_remain() {
        let original = numbered(20);
        let mut d = diff(&original, &two_changes(&original));
        d.hunks[1].origin_len += 1;
        let mut doc = Document::new(&original);
        let id = doc.id();
        let report = run(&mut doc, ApplicationRequest::new(id, d.clone())).unwrap();
        assert_eq!(report.changed(), 1);
        assert!(matches!(
            &report.hunks[1].outcome,
            HunkOutcome::Skipped(SkipReason::Invalid(_))
        ));

        d.hunks[0].origin_len += 1;
        let mut doc = Document::new(&original);
        let request = ApplicationRequest::new(doc.id(), d);
        let err = Transaction::begin(&doc, request).unwrap_err();
        assert!(matches!(err, Error::InvalidDiffFormat { hunk_index: 0, .. }));
        assert_eq!(doc.text(), original);
        assert!(doc.undo().is_err());
    }

    #[test]
    fn out_of_range_hunk_is_rejected() {
        let mut d = diff("a\nb\n", "a\nB\n");
        d.hunks[0].origin_start = 10;
        let doc = Document::new("a\nb\n");
        let request = ApplicationRequest::new(doc.id(), d);
        let err = Transaction::begin(&doc, request).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRangeLineNumbers { line_count: 2, .. }
        ));
    }

    #[test]
    fn stale_document_blocks_on_changed_hunk() {
        let original = numbered(20);
        let d = diff(&original, &two_changes(&original));
        let mut doc = Document::new(&original.replace("line 15\n", "user edit\n"));

        let mut txn = begin(&doc, d);
        assert!(txn.is_stale());
        assert_eq!(txn.step(), Step::Applied { hunk_index: 0 });
        let Step::Blocked(pending) = txn.step() else {
            panic!("expected a conflict")
        };
        assert_eq!(pending.hunk_index, 1);
        assert_eq!(
            pending.conflict.as_ref().map(|c| c.kind),
            Some(ConflictKind::ContentChanged)
        );
        assert!(matches!(txn.step(), Step::Blocked(_)));

        txn.resolve(1, Resolution::UseCurrent).unwrap();
        assert_eq!(txn.step(), Step::Done);
        let report = txn.commit(&mut doc);
        let expected = original
            .replace("line 2\n", "LINE 2\n")
            .replace("line 15\n", "user edit\n");
        assert_eq!(doc.text(), expected);
        assert_eq!(report.conflicts().count(), 1);
    }

    #[test]
    fn merge_replaces_span_with_caller_text() {
        let original = "keep\nold\nkeep\n";
        let d = diff(original, "keep\nnew\nkeep\n");
        let mut doc = Document::new("keep\nuser\nkeep\n");
        let mut txn = begin(&doc, d);
        assert!(matches!(txn.step(), Step::Blocked(_)));
        let merged = "keep\nnew and user\nkeep\n";
        txn.resolve(0, Resolution::Merge(merged.to_owned())).unwrap();
        assert_eq!(txn.step(), Step::Done);
        let report = txn.commit(&mut doc);
        assert_eq!(doc.text(), merged);
        assert_eq!(report.hunks[0].outcome, HunkOutcome::Merged);
    }

    #[test]
    fn overlapping_hunk_blocks_and_keeps_earlier_result() {
        let original = "a\nb\nc\n";
        let hunks = vec![hunk(0, &["a", "b"], &["A", "B"]), hunk(1, &["b"], &["X"])];
        let mut doc = Document::new(original);
        let mut txn = begin(&doc, hand_built(original, hunks));
        assert!(!txn.is_stale());
        assert_eq!(txn.step(), Step::Applied { hunk_index: 0 });
        let Step::Blocked(pending) = txn.step() else {
            panic!("expected a conflict")
        };
        assert_eq!(pending.hunk_index, 1);
        assert_eq!(
            pending.conflict.map(|c| c.kind),
            Some(ConflictKind::Overlapping)
        );

        txn.resolve(1, Resolution::UseCurrent).unwrap();
        assert_eq!(txn.step(), Step::Done);
        let report = txn.commit(&mut doc);
        assert_eq!(doc.text(), "A\nB\nc\n");
        assert_eq!(report.hunks[0].outcome, HunkOutcome::Applied);
        assert_eq!(
            report.hunks[1].outcome,
            HunkOutcome::Skipped(SkipReason::KeptCurrent)
        );
    }

    #[test]
    fn merge_for_a_hunk_before_the_working_copy_goes_to_the_end() {
        let original = "a\nb\nc\nd\ne\nf\n";
        let hunks = vec![
            hunk(0, &["a", "b", "c", "d", "e"], &[]),
            hunk(2, &["c"], &["C"]),
        ];
        let mut doc = Document::new(original);
        let mut txn = begin(&doc, hand_built(original, hunks));
        assert_eq!(txn.step(), Step::Applied { hunk_index: 0 });
        let Step::Blocked(pending) = txn.step() else {
            panic!("expected a conflict")
        };
        assert_eq!(
            pending.conflict.map(|c| c.kind),
            Some(ConflictKind::OutOfRange)
        );

        let merged = Resolution::Merge("merged\n".to_owned());
        txn.resolve(1, merged).unwrap();
        assert_eq!(txn.step(), Step::Done);
        txn.commit(&mut doc);
        assert_eq!(doc.text(), "f\nmerged\n");
    }

    #[test]
    fn use_diff_is_refused_for_out_of_range() {
        let original = numbered(10);
        let d = diff(&original, &original.replace("line 8\n", "LINE 8\n"));
        let doc = Document::new("line 0\nline 1\n");
        let mut txn = begin(&doc, d);
        let Step::Blocked(pending) = txn.step() else {
            panic!("expected a conflict")
        };
        assert_eq!(
            pending.conflict.map(|c| c.kind),
            Some(ConflictKind::OutOfRange)
        );
        assert!(matches!(
            txn.resolve(0, Resolution::UseDiff),
            Err(Error::InvalidResolution { .. })
        ));
        txn.resolve(0, Resolution::UseCurrent).unwrap();
        assert_eq!(txn.step(), Step::Done);
    }

    #[test]
    fn strict_policy_reports_stale_diff() {
        let d = diff("a\nb\n", "a\nB\n");
        let doc = Document::new("a\nc\n");
        let request = ApplicationRequest::new(doc.id(), d)
            .policy(ConflictPolicy::Strict);
        match Transaction::begin(&doc, request) {
            Err(Error::StaleDiff { conflicts, .. }) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictKind::ContentChanged);
            }
            other => panic!("expected StaleDiff, got {other:?}"),
        }
    }

    #[test]
    fn hunk_by_hunk_waits_for_every_hunk() {
        let original = numbered(20);
        let modified = two_changes(&original);
        let mut doc = Document::new(&original);
        let d = diff(&original, &modified);
        let request = ApplicationRequest::new(doc.id(), d).hunk_by_hunk();
        let mut txn = Transaction::begin(&doc, request).unwrap();

        let Step::Blocked(first) = txn.step() else {
            panic!("expected a decision")
        };
        assert_eq!(
            first,
            PendingDecision {
                hunk_index: 0,
                conflict: None
            }
        );
        txn.resolve(0, Resolution::UseDiff).unwrap();
        let Step::Blocked(second) = txn.step() else {
            panic!("expected a decision")
        };
        assert_eq!(second.hunk_index, 1);
        assert!(txn.resolve(0, Resolution::UseDiff).is_err());
        txn.resolve(1, Resolution::UseCurrent).unwrap();
        assert_eq!(txn.step(), Step::Done);
        txn.commit(&mut doc);
        assert_eq!(doc.text(), original.replace("line 2\n", "LINE 2\n"));
    }

    #[test]
    fn dropping_a_transaction_leaves_document_untouched() {
        let original = numbered(20);
        let doc = Document::new(&original);
        let mut txn = begin(&doc, diff(&original, &two_changes(&original)));
        assert!(matches!(txn.step(), Step::Applied { .. }));
        drop(txn);
        assert_eq!(doc.text(), original);
        assert_eq!(doc.undo_depth(), 0);
    }

    #[test]
    fn cursor_follows_inserted_lines() {
        let original = numbered(20);
        let modified = original.replace("line 1\n", "line 1\nnew a\nnew b\n");
        let mut doc = Document::new(&original);
        doc.set_cursor(10);
        let request = ApplicationRequest::new(doc.id(), diff(&original, &modified));
        run(&mut doc, request).unwrap();
        assert_eq!(doc.cursor(), 12);
        assert_eq!(doc.lines()[12], "line 10\n");
    }
}
