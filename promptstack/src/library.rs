//! Loads context candidates from directories of text files.
//!
//! Each `.md` or `.txt` file is one candidate named by its file stem. A first
//! line of the form `tags: a, b` is taken as the candidate's tags and is not
//! part of its text. The file's modification time stands in for last use.

use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use promptstack_core::types::ContextCandidate;

/// Reads every prompt file in `dir`, sorted by id.
///
/// Candidates whose id is in `references` are marked explicit.
///
/// # Errors
///
/// Fails if the directory or one of its prompt files cannot be read.
pub fn load_dir(dir: &Path, references: &[String]) -> anyhow::Result<Vec<ContextCandidate>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_prompt = path.extension().is_some_and(|ext| ext == "md" || ext == "txt");
        if !is_prompt || !entry.file_type()?.is_file() {
            continue;
        }
        let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let (tags, text) = split_tags(&raw);
        let last_used = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        candidates.push(ContextCandidate {
            explicit: references.contains(&id),
            id,
            text,
            tags,
            last_used,
            usage_count: 0,
        });
    }
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(
        dir = %dir.display(),
        candidates = candidates.len(),
        "context directory loaded"
    );
    Ok(candidates)
}

fn split_tags(raw: &str) -> (Vec<String>, String) {
    let Some(rest) = raw.strip_prefix("tags:") else {
        return (Vec::new(), raw.to_owned());
    };
    let (line, body) = rest.split_once('\n').unwrap_or((rest, ""));
    let tags = line
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect();
    (tags, body.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_tags_and_marks_references() {
        let dir = tempfile::tempdir().unwrap();
        let tagged = "tags: voice, Style\nWrite plainly.\n";
        std::fs::write(dir.path().join("tone.md"), tagged).unwrap();
        std::fs::write(dir.path().join("outline.txt"), "Intro, body, end.\n").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let candidates = load_dir(dir.path(), &["tone".to_owned()]).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "outline");
        assert!(!candidates[0].explicit);
        assert!(candidates[0].tags.is_empty());
        assert_eq!(candidates[1].id, "tone");
        assert!(candidates[1].explicit);
        assert_eq!(candidates[1].tags, vec!["voice", "Style"]);
        assert_eq!(candidates[1].text, "Write plainly.\n");
        assert!(candidates[1].last_used.is_some());
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dir(&dir.path().join("absent"), &[]).is_err());
    }
}
