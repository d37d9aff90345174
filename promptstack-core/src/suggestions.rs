//! Extraction of suggestions from raw provider text.
//!
//! Two response shapes are understood. The tagged shape is what
//! [`SYSTEM_PROMPT`] asks for:
//!
//! ```text
//! <suggestion id="s1" title="Tighten intro" kind="clarity">
//! <summary>One line</summary>
//! <rationale>Why it helps</rationale>
//! <content>
//! full replacement text
//! </content>
//! </suggestion>
//! ```
//!
//! with `<diff>` (a unified patch) allowed in place of `<content>`. The JSON
//! shape `{"suggestions": [...]}` with positional `proposed_changes` is
//! accepted as a fallback for models that prefer it. Either may be surrounded
//! by prose or wrapped in a code fence.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Edit, Proposal, Suggestion, SuggestionKind};

/// Instructions sent as the system prompt of every suggestion request.
pub const SYSTEM_PROMPT: &str = r#"You help the user improve the text they are composing.
Read the composition and the supporting context, then propose focused improvements.

Each suggestion belongs to one category:
- recommendation: pull in or adapt relevant material from the supporting context
- gap: add missing context or information
- formatting: improve structure or organisation
- contradiction: resolve conflicting instructions or requirements
- clarity: rewrite unclear or ambiguous wording
- reformatting: restructure the whole text for better flow

Reply with one block per suggestion:

<suggestion id="short-id" title="Short title" kind="category">
<summary>One sentence describing the change</summary>
<rationale>Why the change helps</rationale>
<content>
The complete composition as it should read after the change
</content>
</suggestion>

Instead of <content> you may give a unified diff against the composition
inside <diff>...</diff>.
Be conservative and practical.
Only suggest changes that genuinely improve the composition."#;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<suggestion\b([^>]*)>").unwrap());
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).unwrap());

const CLOSE_TAG: &str = "</suggestion>";

/// Why a single suggestion was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectKind {
    /// A `<suggestion>` block without its closing tag.
    Unterminated,
    /// Neither a `<content>` nor a `<diff>` body.
    MissingBody,
    /// More than one body element.
    AmbiguousBody,
    /// A JSON entry that does not have the expected fields.
    InvalidEntry,
    /// The text looked like JSON but could not be decoded.
    InvalidJson,
}

/// A malformed suggestion, recorded instead of aborting the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDefect {
    /// Position of the offending block or entry in the response, 0-based.
    pub index: usize,
    pub kind: DefectKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub suggestions: Vec<Suggestion>,
    pub defects: Vec<ParseDefect>,
    /// Overall summary, when the response carried one.
    pub summary: Option<String>,
}

/// Parses a raw provider response.
///
/// An empty or whitespace-only response is a valid answer with no
/// suggestions.
///
/// # Errors
///
/// Returns `Error::MalformedResponse` when the response is non-empty but not a
/// single suggestion could be extracted. The error carries the defects found.
pub fn parse(raw: &str) -> Result<ParseOutcome> {
    if raw.trim().is_empty() {
        return Ok(ParseOutcome::default());
    }

    let mut outcome = parse_tagged(raw);
    if outcome.suggestions.is_empty() && outcome.defects.is_empty() {
        outcome = parse_json(raw);
    }

    if outcome.suggestions.is_empty() {
        tracing::warn!(
            defects = outcome.defects.len(),
            "response contained no usable suggestion"
        );
        return Err(Error::MalformedResponse {
            defects: outcome.defects,
        });
    }
    for defect in &outcome.defects {
        tracing::debug!(
            index = defect.index,
            kind = ?defect.kind,
            detail = %defect.detail,
            "skipped suggestion"
        );
    }
    Ok(outcome)
}

fn parse_tagged(raw: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let opens: Vec<_> = OPEN_TAG.captures_iter(raw).collect();
    for (index, caps) in opens.iter().enumerate() {
        let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let next_open = opens
            .get(index + 1)
            .and_then(|c| c.get(0))
            .map_or(raw.len(), |m| m.start());
        let rest = &raw[whole.end()..next_open];
        let Some(close) = rest.find(CLOSE_TAG) else {
            outcome.defects.push(ParseDefect {
                index,
                kind: DefectKind::Unterminated,
                detail: format!("missing {CLOSE_TAG}"),
            });
            continue;
        };
        let block = &rest[..close];

        let mut id = None;
        let mut title = None;
        let mut kind = None;
        for attr in ATTRIBUTE.captures_iter(attrs.as_str()) {
            let value = attr[2].trim().to_owned();
            match &attr[1] {
                "id" => id = Some(value),
                "title" => title = Some(value),
                "kind" | "type" => kind = SuggestionKind::from_label(&value),
                _ => {}
            }
        }

        let content = element(block, "content");
        let diff = element(block, "diff");
        let proposal = match (content, diff) {
            (Some(content), None) => Proposal::Content(unwrap_fence(content)),
            (None, Some(diff)) => Proposal::Patch(unwrap_fence(diff)),
            (Some(_), Some(_)) => {
                outcome.defects.push(ParseDefect {
                    index,
                    kind: DefectKind::AmbiguousBody,
                    detail: "both <content> and <diff> present".to_owned(),
                });
                continue;
            }
            (None, None) => {
                outcome.defects.push(ParseDefect {
                    index,
                    kind: DefectKind::MissingBody,
                    detail: "expected <content> or <diff>".to_owned(),
                });
                continue;
            }
        };

        outcome.suggestions.push(Suggestion {
            id: non_empty(id).unwrap_or_else(generate_id),
            kind: kind.unwrap_or_default(),
            title: non_empty(title).unwrap_or_else(|| placeholder_title(index)),
            summary: trimmed_element(block, "summary"),
            rationale: trimmed_element(block, "rationale"),
            proposal,
        });
    }
    outcome
}

/// Inner text of the first `<name>...</name>` element in `block`.
fn element<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = block.find(&open)? + open.len();
    let end = start + block[start..].find(&close)?;
    Some(&block[start..end])
}

fn trimmed_element(block: &str, name: &str) -> String {
    element(block, name)
        .map(|s| s.trim().to_owned())
        .unwrap_or_default()
}

/// Strips the newline after the opening tag and, when the whole body is one
/// code fence, the fence lines. Fences inside the body are kept.
fn unwrap_fence(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() >= 6 && trimmed.starts_with("```") && trimmed.ends_with("```") {
        if let Some(newline) = trimmed.find('\n') {
            let inner = &trimmed[newline + 1..trimmed.len() - 3];
            if !inner.contains("```") {
                return inner.to_owned();
            }
        }
    }
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    body.to_owned()
}

#[derive(Deserialize)]
struct JsonResponse {
    #[serde(default)]
    suggestions: Vec<serde_json::Value>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
struct JsonSuggestion {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    description: Option<String>,
    summary: Option<String>,
    rationale: Option<String>,
    proposed_content: Option<String>,
    diff: Option<String>,
    proposed_changes: Option<Vec<Edit>>,
}

fn parse_json(raw: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let Some(start) = raw.find('{') else {
        return outcome;
    };
    let json = match raw.rfind('}') {
        Some(end) if end > start => &raw[start..=end],
        _ => &raw[start..],
    };
    let response: JsonResponse = match serde_json::from_str(json) {
        Ok(response) => response,
        Err(e) => {
            outcome.defects.push(ParseDefect {
                index: 0,
                kind: DefectKind::InvalidJson,
                detail: e.to_string(),
            });
            return outcome;
        }
    };
    outcome.summary = non_empty(response.summary);

    for (index, value) in response.suggestions.into_iter().enumerate() {
        let entry: JsonSuggestion = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                outcome.defects.push(ParseDefect {
                    index,
                    kind: DefectKind::InvalidEntry,
                    detail: e.to_string(),
                });
                continue;
            }
        };
        let bodies = [
            entry.proposed_content.map(Proposal::Content),
            entry.diff.map(Proposal::Patch),
            entry
                .proposed_changes
                .filter(|edits| !edits.is_empty())
                .map(Proposal::Edits),
        ];
        let mut bodies = bodies.into_iter().flatten();
        let proposal = match (bodies.next(), bodies.next()) {
            (Some(proposal), None) => proposal,
            (Some(_), Some(_)) => {
                outcome.defects.push(ParseDefect {
                    index,
                    kind: DefectKind::AmbiguousBody,
                    detail: "more than one proposal field".to_owned(),
                });
                continue;
            }
            (None, _) => {
                outcome.defects.push(ParseDefect {
                    index,
                    kind: DefectKind::MissingBody,
                    detail: "expected proposed_content, diff or proposed_changes".to_owned(),
                });
                continue;
            }
        };
        let kind = entry.kind.as_deref().and_then(SuggestionKind::from_label);
        let summary = non_empty(entry.summary).or(non_empty(entry.description));
        outcome.suggestions.push(Suggestion {
            id: non_empty(entry.id).unwrap_or_else(generate_id),
            kind: kind.unwrap_or_default(),
            title: non_empty(entry.title).unwrap_or_else(|| placeholder_title(index)),
            summary: summary.unwrap_or_default(),
            rationale: entry.rationale.unwrap_or_default(),
            proposal,
        });
    }
    outcome
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn placeholder_title(index: usize) -> String {
    format!("Suggestion {}", index + 1)
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_BLOCKS: &str = r#"Sure! Here are my suggestions.

<suggestion id="s1" title="Tighten intro" kind="clarity">
<summary>Shorter opening</summary>
<rationale>The first sentence repeats the title.</rationale>
<content>
Intro.
Body.
</content>
</suggestion>

<suggestion kind="gap">
<diff>
@@ -1,1 +1,2 @@
 Intro.
+Audience: engineers.
</diff>
</suggestion>

Let me know if you want more."#;

    #[test]
    fn tagged_blocks_with_prose() {
        let outcome = parse(TWO_BLOCKS).unwrap();
        assert!(outcome.defects.is_empty());
        assert_eq!(outcome.suggestions.len(), 2);

        let first = &outcome.suggestions[0];
        assert_eq!(first.id, "s1");
        assert_eq!(first.kind, SuggestionKind::Clarity);
        assert_eq!(first.title, "Tighten intro");
        assert_eq!(first.summary, "Shorter opening");
        assert_eq!(
            first.proposal,
            Proposal::Content("Intro.\nBody.\n".to_owned())
        );

        let second = &outcome.suggestions[1];
        assert_eq!(second.title, "Suggestion 2");
        assert_eq!(second.kind, SuggestionKind::Gap);
        assert!(!second.id.is_empty());
        assert!(matches!(
            &second.proposal,
            Proposal::Patch(p) if p.starts_with("@@ -1,1 +1,2 @@")
        ));
    }

    #[test]
    fn fenced_body_is_unwrapped_but_inner_fences_survive() {
        let raw = "<suggestion id=\"a\"><content>\n```markdown\n# Title\n```\n</content>\
                   </suggestion>\n\
                   <suggestion id=\"b\"><content>\nRun:\n```sh\nmake\n```\n</content>\
                   </suggestion>";
        let outcome = parse(raw).unwrap();
        assert_eq!(
            outcome.suggestions[0].proposal,
            Proposal::Content("# Title\n".to_owned())
        );
        assert_eq!(
            outcome.suggestions[1].proposal,
            Proposal::Content("Run:\n```sh\nmake\n```\n".to_owned())
        );
    }

    #[test]
    fn truncated_block_is_a_defect() {
        let raw = "<suggestion id=\"ok\"><content>\nfine\n</content></suggestion>\n\
                   <suggestion id=\"cut\"><content>\nhalf";
        let outcome = parse(raw).unwrap();
        assert_eq!(outcome.suggestions.len(), 1);
        assert_eq!(outcome.defects.len(), 1);
        assert_eq!(outcome.defects[0].index, 1);
        assert_eq!(outcome.defects[0].kind, DefectKind::Unterminated);
    }

    #[test]
    fn block_without_body_is_a_defect() {
        let raw = "<suggestion id=\"x\"><summary>nothing</summary></suggestion>";
        match parse(raw) {
            Err(Error::MalformedResponse { defects }) => {
                assert_eq!(defects.len(), 1);
                assert_eq!(defects[0].kind, DefectKind::MissingBody);
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_not_an_error() {
        assert_eq!(parse("  \n ").unwrap(), ParseOutcome::default());
    }

    #[test]
    fn prose_only_response_is_malformed() {
        assert!(matches!(
            parse("I have no suggestions today."),
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[test]
    fn json_response_with_edits() {
        let raw = r#"```json
{
  "suggestions": [
    {
      "type": "formatting",
      "title": "Add heading",
      "description": "Start with a heading",
      "proposed_changes": [
        {"line": 1, "column": 1, "old_content": "", "new_content": "", "length": 0},
        {"line": 1, "column": 1, "old_content": "Intro", "new_content": "Introduction", "length": 5}
      ]
    },
    {"type": "gap", "title": "Nothing to do"}
  ],
  "summary": "Mostly fine"
}
```"#;
        let outcome = parse(raw).unwrap();
        assert_eq!(outcome.summary.as_deref(), Some("Mostly fine"));
        assert_eq!(outcome.suggestions.len(), 1);
        let s = &outcome.suggestions[0];
        assert_eq!(s.kind, SuggestionKind::Formatting);
        assert_eq!(s.summary, "Start with a heading");
        assert!(matches!(&s.proposal, Proposal::Edits(edits) if edits.len() == 2));
        assert_eq!(outcome.defects.len(), 1);
        assert_eq!(outcome.defects[0].kind, DefectKind::MissingBody);
    }

    #[test]
    fn broken_json_is_malformed() {
        match parse("{\"suggestions\": [") {
            Err(Error::MalformedResponse { defects }) => {
                assert_eq!(defects[0].kind, DefectKind::InvalidJson)
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }
}
