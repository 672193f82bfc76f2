//! Strict decoding of structured LLM output.
//!
//! Model completions arrive as free text that is supposed to contain a JSON
//! object. The boundary here is deliberately strict: salvage the JSON from
//! whatever fencing the model wrapped it in, then decode against a typed
//! schema and reject on any violation. Nothing loosely-typed crosses into
//! the core.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// A single proposed edit: replace `old_code` with `new_code` in `filename`.
///
/// `old_code` is quoted by the model and may not match the file verbatim;
/// the fuzzy span locator resolves it against the real contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditProposal {
    /// Target filename as quoted by the model; resolved by suffix match
    /// against the real file tree.
    pub filename: String,
    /// The code to be replaced, as the model believes it appears.
    pub old_code: String,
    /// The replacement code.
    pub new_code: String,
}

impl EditProposal {
    /// Decodes an edit proposal from a raw completion.
    pub fn from_completion(completion: &str) -> Result<Self, SchemaError> {
        let json = extract_json(completion)?;
        Ok(serde_json::from_str(json)?)
    }
}

/// A raw patch reply: the model returns a complete unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProposal {
    /// Contents of a `.patch` file. Must start with `diff --git a/`;
    /// validated by [`crate::patch::Patch::parse`] at the next boundary.
    pub patch_file: String,
}

impl PatchProposal {
    /// Decodes a patch proposal from a raw completion.
    pub fn from_completion(completion: &str) -> Result<Self, SchemaError> {
        let json = extract_json(completion)?;
        Ok(serde_json::from_str(json)?)
    }
}

/// Extracts the first balanced JSON object from a completion.
///
/// Handles the common cases: a bare object, an object inside a ``` fence,
/// and leading/trailing prose around the object.
pub fn extract_json(completion: &str) -> Result<&str, SchemaError> {
    let start = completion.find('{').ok_or(SchemaError::NoJson)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in completion[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&completion[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Err(SchemaError::NoJson)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bare_object() {
        let completion = r#"{"filename": "src/main.py", "old_code": "return 2", "new_code": "return 3"}"#;
        let edit = EditProposal::from_completion(completion).unwrap();
        assert_eq!(edit.filename, "src/main.py");
        assert_eq!(edit.old_code, "return 2");
        assert_eq!(edit.new_code, "return 3");
    }

    #[test]
    fn test_decode_fenced_object_with_prose() {
        let completion = "Sure, here is the change:\n```json\n{\"filename\": \"f.py\", \"old_code\": \"a\", \"new_code\": \"b\"}\n```\nLet me know!";
        let edit = EditProposal::from_completion(completion).unwrap();
        assert_eq!(edit.filename, "f.py");
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let completion = r#"{"filename": "f.py", "old_code": "a"}"#;
        assert!(matches!(
            EditProposal::from_completion(completion),
            Err(SchemaError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_field() {
        let completion =
            r#"{"filename": "f.py", "old_code": "a", "new_code": "b", "confidence": 0.9}"#;
        assert!(matches!(
            EditProposal::from_completion(completion),
            Err(SchemaError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_no_json() {
        assert!(matches!(
            EditProposal::from_completion("I cannot help with that."),
            Err(SchemaError::NoJson)
        ));
    }

    #[test]
    fn test_extract_json_handles_braces_in_strings() {
        let completion = r#"{"patch_file": "diff --git a/x b/x\n+if x { }\n"} trailing"#;
        let json = extract_json(completion).unwrap();
        let patch: PatchProposal = serde_json::from_str(json).unwrap();
        assert!(patch.patch_file.contains("{ }"));
    }

    #[test]
    fn test_extract_json_nested_objects() {
        let completion = r#"prefix {"a": {"b": 1}, "c": 2} suffix"#;
        assert_eq!(extract_json(completion).unwrap(), r#"{"a": {"b": 1}, "c": 2}"#);
    }

    #[test]
    fn test_extract_json_unbalanced() {
        assert!(matches!(
            extract_json(r#"{"a": 1"#),
            Err(SchemaError::NoJson)
        ));
    }
}
