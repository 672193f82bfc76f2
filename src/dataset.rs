//! Dataset boundary: tasks the harness evaluates against.
//!
//! A task pins a repository and commit, carries the issue text to solve,
//! and optionally names the tests that must pass plus a test-only patch.
//! Loading and curation of real benchmark datasets stays outside the core;
//! the JSONL source here is enough for local runs and tests.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One evaluation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Repository identifier (`owner/repo`, URL, or local path).
    pub repo: String,
    /// Commit the environment is pinned to.
    pub commit: String,
    /// Natural-language issue description.
    pub issue: String,
    /// Fully-qualified identifiers of the tests that demonstrate the fix.
    #[serde(default)]
    pub failing_tests: Vec<String>,
    /// Test-only patch that adds the demonstrating tests, when the dataset
    /// provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_patch: Option<String>,
}

/// Source of evaluation tasks, indexed like the underlying dataset.
pub trait TaskSource {
    /// Number of tasks available.
    fn len(&self) -> usize;

    /// Returns the task at `index`, if any.
    fn get(&self, index: usize) -> Option<Task>;

    /// Returns true if the source holds no tasks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tasks loaded from a JSONL file, one task object per line.
#[derive(Debug, Clone)]
pub struct JsonlTaskSource {
    tasks: Vec<Task>,
}

impl JsonlTaskSource {
    /// Loads tasks from `path`. Blank lines are skipped; any malformed
    /// line is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading task file '{}'", path.display()))?;
        Self::from_text(&text)
    }

    /// Parses tasks from in-memory JSONL text.
    pub fn from_text(text: &str) -> anyhow::Result<Self> {
        let mut tasks = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let task: Task = serde_json::from_str(line)
                .with_context(|| format!("malformed task on line {}", lineno + 1))?;
            tasks.push(task);
        }
        Ok(Self { tasks })
    }
}

impl TaskSource for JsonlTaskSource {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn get(&self, index: usize) -> Option<Task> {
        self.tasks.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"repo": "psf/requests", "commit": "abc123", "issue": "timeouts ignored", "failing_tests": ["T.test_timeout"]}

{"repo": "a/b", "commit": "def456", "issue": "off by one"}
"#;

    #[test]
    fn test_load_jsonl_skipping_blank_lines() {
        let source = JsonlTaskSource::from_text(SAMPLE).unwrap();
        assert_eq!(source.len(), 2);
        assert!(!source.is_empty());

        let first = source.get(0).unwrap();
        assert_eq!(first.repo, "psf/requests");
        assert_eq!(first.failing_tests, vec!["T.test_timeout".to_string()]);
        assert!(first.test_patch.is_none());

        let second = source.get(1).unwrap();
        assert!(second.failing_tests.is_empty());
    }

    #[test]
    fn test_out_of_range_index() {
        let source = JsonlTaskSource::from_text(SAMPLE).unwrap();
        assert!(source.get(2).is_none());
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let err = JsonlTaskSource::from_text("{\"repo\": }\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
