//! Background thread that computes and renders diffs.
//!
//! The thread owns one `DiffGenerator` built from the loaded configuration
//! and serves requests until every sender is dropped.

use crossbeam_channel::Receiver;
use promptstack_core::config::DiffConfig;
use promptstack_core::diff::DiffGenerator;
use promptstack_core::types::{Diff, DiffLine, DiffLineKind};
use similar::{ChangeTag, TextDiff};
use tokio::sync::mpsc::UnboundedSender;

use crate::event::AppEvent;
use crate::render::types::{DiffPayload, DiffRequest, RenderStyle};

/// Entry point for the diff thread.
///
/// Loops over incoming `DiffRequest`s until the channel is closed and sends
/// each result back via `event_tx` as `AppEvent::DiffReady`.
pub fn diff_worker_loop(
    config: DiffConfig,
    rx: Receiver<DiffRequest>,
    event_tx: UnboundedSender<AppEvent>,
) {
    let generator = DiffGenerator::new(&config);
    for request in rx {
        let payload = handle_request(&generator, request);
        if event_tx.send(AppEvent::DiffReady(Box::new(payload))).is_err() {
            break;
        }
    }
    tracing::debug!("diff worker stopped");
}

fn handle_request(generator: &DiffGenerator, request: DiffRequest) -> DiffPayload {
    let diff = generator.generate(&request.original, &request.modified);
    let stats = diff.stats();
    tracing::debug!(
        hunks = stats.hunks,
        added = stats.added,
        removed = stats.removed,
        "diff computed"
    );

    let mut rendered = String::new();
    if !diff.is_empty() {
        rendered.push_str(&format!(
            "--- {}\n+++ {}\n",
            request.original_label, request.modified_label
        ));
        match request.style {
            RenderStyle::Unified => rendered.push_str(&diff.to_unified()),
            RenderStyle::Words => rendered.push_str(&render_words(&diff)),
        }
    }
    DiffPayload { diff, rendered }
}

/// Renders `diff` hunk by hunk, marking changed words in paired lines.
///
/// A run of removed lines directly followed by a run of added lines is
/// paired up line by line; unpaired lines are printed as they are.
fn render_words(diff: &Diff) -> String {
    let mut out = String::new();
    for hunk in &diff.hunks {
        out.push_str(&hunk.header());
        out.push('\n');

        let mut i = 0;
        while i < hunk.lines.len() {
            let line = &hunk.lines[i];
            if line.kind != DiffLineKind::Removed {
                push_line(&mut out, line.kind.origin(), &line.content);
                i += 1;
                continue;
            }
            let removed = run_of(&hunk.lines[i..], DiffLineKind::Removed);
            let added = run_of(&hunk.lines[i + removed.len()..], DiffLineKind::Added);
            let paired = removed.len().min(added.len());
            let mut old_out = Vec::with_capacity(removed.len());
            let mut new_out = Vec::with_capacity(added.len());
            for (old, new) in removed.iter().zip(added.iter()) {
                let (old_marked, new_marked) = word_diff_markup(&old.content, &new.content);
                old_out.push((old_marked, old.content.ends_with('\n')));
                new_out.push((new_marked, new.content.ends_with('\n')));
            }
            old_out.extend(removed[paired..].iter().map(unmarked));
            new_out.extend(added[paired..].iter().map(unmarked));
            for (text, terminated) in &old_out {
                push_text(&mut out, '-', text, *terminated);
            }
            for (text, terminated) in &new_out {
                push_text(&mut out, '+', text, *terminated);
            }
            i += removed.len() + added.len();
        }
    }
    out
}

fn run_of(lines: &[DiffLine], kind: DiffLineKind) -> &[DiffLine] {
    let len = lines.iter().take_while(|l| l.kind == kind).count();
    &lines[..len]
}

fn unmarked(line: &DiffLine) -> (String, bool) {
    let text = line.content.strip_suffix('\n').unwrap_or(&line.content);
    (text.to_owned(), line.content.ends_with('\n'))
}

fn push_line(out: &mut String, origin: char, content: &str) {
    let text = content.strip_suffix('\n').unwrap_or(content);
    push_text(out, origin, text, content.ends_with('\n'));
}

/// Pushes one rendered line; an unterminated source line gets the
/// `\ No newline at end of file` marker, as in unified output.
fn push_text(out: &mut String, origin: char, text: &str, terminated: bool) {
    out.push(origin);
    out.push_str(text);
    out.push('\n');
    if !terminated {
        out.push_str("\\ No newline at end of file\n");
    }
}

/// Marks the words that differ between a removed/added line pair.
///
/// Returns the old line with deletions wrapped in `[-…-]` and the new line
/// with insertions wrapped in `{+…+}`. Adjacent changed words share one
/// marker.
pub fn word_diff_markup(old_line: &str, new_line: &str) -> (String, String) {
    let old_line = old_line.strip_suffix('\n').unwrap_or(old_line);
    let new_line = new_line.strip_suffix('\n').unwrap_or(new_line);
    let diff = TextDiff::from_words(old_line, new_line);
    let mut old = Marked::new("[-", "-]");
    let mut new = Marked::new("{+", "+}");

    for op in diff.ops() {
        for change in diff.iter_changes(op) {
            let value = change.value();
            match change.tag() {
                ChangeTag::Delete => old.push(true, value),
                ChangeTag::Insert => new.push(true, value),
                ChangeTag::Equal => {
                    old.push(false, value);
                    new.push(false, value);
                }
            }
        }
    }
    (old.finish(), new.finish())
}

/// Text under construction with a possibly open change marker.
struct Marked {
    open: &'static str,
    close: &'static str,
    text: String,
    in_change: bool,
}

impl Marked {
    fn new(open: &'static str, close: &'static str) -> Self {
        Self {
            open,
            close,
            text: String::new(),
            in_change: false,
        }
    }

    fn push(&mut self, changed: bool, value: &str) {
        if changed != self.in_change {
            self.text.push_str(if changed { self.open } else { self.close });
            self.in_change = changed;
        }
        self.text.push_str(value);
    }

    fn finish(mut self) -> String {
        if self.in_change {
            self.text.push_str(self.close);
        }
        self.text
    }
}
