//! Parsing the oracle's JSON answer into a patch

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::OracleError;
use crate::domain::ProposedPatch;

#[derive(Debug, Deserialize)]
struct Answer {
    patches: Vec<Entry>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    path: String,
    content: String,
}

/// Parse `{"patches": [{"path", "content"}], "notes"}` out of a model answer
///
/// Models sometimes wrap the object in prose or code fences, so when the whole
/// text is not valid JSON the outermost `{ ... }` span is tried as well.
pub fn parse_answer(text: &str) -> Result<ProposedPatch, OracleError> {
    debug!(len = text.len(), "parse_answer: called");
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(OracleError::Empty);
    }

    let answer: Answer = match serde_json::from_str(trimmed) {
        Ok(a) => a,
        Err(first) => {
            debug!(error = %first, "parse_answer: direct parse failed, trying outermost object");
            let span = match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if end > start => &trimmed[start..=end],
                _ => return Err(OracleError::Malformed(format!("no JSON object found ({})", first))),
            };
            serde_json::from_str(span).map_err(|e| OracleError::Malformed(e.to_string()))?
        }
    };

    let mut patch = ProposedPatch::new();
    for entry in answer.patches {
        let path = normalize(&entry.path);
        if patch.insert(path.clone(), entry.content).is_some() {
            return Err(OracleError::DuplicateFile(path));
        }
    }
    if patch.is_empty() {
        return Err(OracleError::Empty);
    }
    if let Some(notes) = answer.notes.filter(|n| !n.trim().is_empty()) {
        patch.notes = Some(notes);
    }

    debug!(files = patch.len(), "parse_answer: parsed");
    Ok(patch)
}

/// Drop `./` segments so `./tests/x.py` and `tests/x.py` compare equal
fn normalize(raw: &str) -> PathBuf {
    Path::new(raw.trim())
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let text = r#"{"patches": [
            {"path": "custom_parsers/icici_parser.py", "content": "def parse(p):\n    return None\n"},
            {"path": "tests/test_icici.py", "content": "def test_x():\n    pass\n"}
        ], "notes": "initial version"}"#;

        let patch = parse_answer(text).unwrap();

        assert_eq!(patch.len(), 2);
        assert_eq!(
            patch.get(Path::new("custom_parsers/icici_parser.py")),
            Some("def parse(p):\n    return None\n")
        );
        assert_eq!(patch.notes.as_deref(), Some("initial version"));
    }

    #[test]
    fn test_parse_json_wrapped_in_fences() {
        let text = "Here you go:\n```json\n{\"patches\": [{\"path\": \"./a.py\", \"content\": \"x = {}\"}]}\n```\n";

        let patch = parse_answer(text).unwrap();

        assert_eq!(patch.get(Path::new("a.py")), Some("x = {}"));
        assert!(patch.notes.is_none());
    }

    #[test]
    fn test_empty_answer() {
        assert!(matches!(parse_answer("  \n "), Err(OracleError::Empty)));
    }

    #[test]
    fn test_no_patches_is_empty() {
        let text = r#"{"patches": [], "notes": "nothing to change"}"#;
        assert!(matches!(parse_answer(text), Err(OracleError::Empty)));
    }

    #[test]
    fn test_no_object_is_malformed() {
        assert!(matches!(parse_answer("I cannot help with that."), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        assert!(matches!(
            parse_answer(r#"{"files": {"a.py": "x"}}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            parse_answer(r#"{"patches": [{"path": "a.py"}]}"#),
            Err(OracleError::Malformed(_))
        ));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let text = r#"{"patches": [
            {"path": "a.py", "content": "1"},
            {"path": "./a.py", "content": "2"}
        ]}"#;
        assert!(matches!(parse_answer(text), Err(OracleError::DuplicateFile(p)) if p == Path::new("a.py")));
    }
}
