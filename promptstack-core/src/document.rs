//! The editable document and its undo history.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::types::{split_lines, ContentHash, DocumentId};

/// Default number of undo entries kept per document.
pub const DEFAULT_UNDO_LIMIT: usize = 100;

/// One contiguous replacement performed by an application.
///
/// `start` is the line index in the text as it was when the span was applied,
/// that is after every earlier span of the same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSpan {
    pub start: usize,
    pub removed: Vec<String>,
    pub inserted: Vec<String>,
}

/// Everything needed to reverse (and redo) one completed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub hash_before: ContentHash,
    pub hash_after: ContentHash,
    pub cursor_before: usize,
    pub cursor_after: usize,
    pub spans: Vec<AppliedSpan>,
}

/// A point-in-time copy of a document, handed out by the application queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub text: String,
    pub hash: ContentHash,
    pub cursor: usize,
    pub undo_depth: usize,
    pub redo_depth: usize,
}

/// Mutable text owned by exactly one application worker at a time.
///
/// Content is kept as lines with their terminators; the cursor is a line
/// index clamped to the document.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    lines: Vec<String>,
    cursor: usize,
    undo: VecDeque<UndoEntry>,
    redo: Vec<UndoEntry>,
    undo_limit: usize,
}

impl Document {
    pub fn new(text: &str) -> Self {
        Self {
            id: DocumentId::new(),
            lines: split_lines(text),
            cursor: 0,
            undo: VecDeque::new(),
            redo: Vec::new(),
            undo_limit: DEFAULT_UNDO_LIMIT,
        }
    }

    pub fn with_undo_limit(mut self, limit: usize) -> Self {
        self.undo_limit = limit;
        while self.undo.len() > limit {
            self.undo.pop_front();
        }
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn text(&self) -> String {
        self.lines.concat()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn hash(&self) -> ContentHash {
        ContentHash::of_lines(&self.lines)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, line: usize) {
        self.cursor = line.min(self.lines.len());
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id,
            text: self.text(),
            hash: self.hash(),
            cursor: self.cursor,
            undo_depth: self.undo.len(),
            redo_depth: self.redo.len(),
        }
    }

    /// Replaces the content with an edit made outside the pipeline.
    ///
    /// History is kept, but entries no longer match the new content, so undo
    /// reports `DocumentDiverged` until the text returns to a known state.
    pub fn replace_content(&mut self, text: &str) {
        self.lines = split_lines(text);
        self.cursor = self.cursor.min(self.lines.len());
        self.redo.clear();
    }

    /// Installs the result of a completed application.
    ///
    /// An empty `spans` list changes nothing and records no history.
    pub(crate) fn commit(&mut self, lines: Vec<String>, spans: Vec<AppliedSpan>, cursor: usize) {
        if spans.is_empty() {
            return;
        }
        let entry = UndoEntry {
            hash_before: self.hash(),
            hash_after: ContentHash::of_lines(&lines),
            cursor_before: self.cursor,
            cursor_after: cursor.min(lines.len()),
            spans,
        };
        self.lines = lines;
        self.cursor = entry.cursor_after;
        self.redo.clear();
        self.undo.push_back(entry);
        if self.undo.len() > self.undo_limit {
            self.undo.pop_front();
        }
    }

    /// Reverts the most recent application.
    ///
    /// # Errors
    ///
    /// Returns `Error::NothingToUndo` on an empty history and
    /// `Error::DocumentDiverged` if the content is not the state the entry left
    /// behind. The document is unchanged on error.
    pub fn undo(&mut self) -> Result<ContentHash> {
        let entry = self.undo.back().ok_or(Error::NothingToUndo)?;
        let lines = self.rewind(entry)?;
        let Some(entry) = self.undo.pop_back() else {
            return Err(Error::NothingToUndo);
        };
        self.lines = lines;
        self.cursor = entry.cursor_before.min(self.lines.len());
        let hash = entry.hash_before;
        self.redo.push(entry);
        Ok(hash)
    }

    /// Re-applies the most recently undone application.
    ///
    /// # Errors
    ///
    /// Returns `Error::NothingToRedo` when nothing was undone since the last
    /// application, and `Error::DocumentDiverged` as for [`Document::undo`].
    pub fn redo(&mut self) -> Result<ContentHash> {
        let entry = self.redo.last().ok_or(Error::NothingToRedo)?;
        let lines = self.replay(entry)?;
        let Some(entry) = self.redo.pop() else {
            return Err(Error::NothingToRedo);
        };
        self.lines = lines;
        self.cursor = entry.cursor_after.min(self.lines.len());
        let hash = entry.hash_after;
        self.undo.push_back(entry);
        Ok(hash)
    }

    fn rewind(&self, entry: &UndoEntry) -> Result<Vec<String>> {
        let actual = self.hash();
        if actual != entry.hash_after {
            return Err(Error::DocumentDiverged {
                expected: entry.hash_after,
                actual,
            });
        }
        let mut lines = self.lines.clone();
        for span in entry.spans.iter().rev() {
            let end = span.start + span.inserted.len();
            lines.splice(span.start..end, span.removed.iter().cloned());
        }
        let restored = ContentHash::of_lines(&lines);
        if restored != entry.hash_before {
            return Err(Error::DocumentDiverged {
                expected: entry.hash_before,
                actual: restored,
            });
        }
        Ok(lines)
    }

    fn replay(&self, entry: &UndoEntry) -> Result<Vec<String>> {
        let actual = self.hash();
        if actual != entry.hash_before {
            return Err(Error::DocumentDiverged {
                expected: entry.hash_before,
                actual,
            });
        }
        let mut lines = self.lines.clone();
        for span in &entry.spans {
            let end = span.start + span.removed.len();
            lines.splice(span.start..end, span.inserted.iter().cloned());
        }
        let replayed = ContentHash::of_lines(&lines);
        if replayed != entry.hash_after {
            return Err(Error::DocumentDiverged {
                expected: entry.hash_after,
                actual: replayed,
            });
        }
        Ok(lines)
    }
}
