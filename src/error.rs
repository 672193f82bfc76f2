//! Error types for swe-gym operations.
//!
//! Defines typed errors for the major subsystems:
//! - Fuzzy span location
//! - Patch synthesis and validation
//! - Sandbox (container) execution
//! - Test report parsing
//! - LLM API interactions
//!
//! The recoverable/fatal split follows the harness contract: `LocatorError`,
//! `PatchError::FileNotFound` and `SandboxError::MalformedPatch` are
//! surfaced to the orchestration layer so it can resample the model with the
//! error text embedded as feedback; `SandboxError::DaemonUnavailable` is
//! fatal for the whole process.

use thiserror::Error;

/// Errors that can occur while locating an approximate code span.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("old code not found in the file: no approximate match within {budget} edits")]
    SpanNotFound { budget: usize },

    #[error(
        "old code not found in the file: best match similarity {ratio} below threshold {threshold}"
    )]
    BelowThreshold { ratio: u32, threshold: u32 },

    #[error("cannot search for an empty snippet")]
    EmptySnippet,
}

/// Errors that can occur during patch synthesis.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("file '{0}' not found in the working tree")]
    FileNotFound(String),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error("patch must start with 'diff --git a/', got: {preview}")]
    InvalidHeader { preview: String },

    #[error("diff command failed (exit {code}): {stderr}")]
    DiffFailed { code: i32, stderr: String },

    #[error("git command failed in '{dir}': {message}")]
    GitFailed { dir: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during sandboxed patch application and testing.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("failed to provision sandbox: {0}")]
    ProvisionFailed(String),

    /// The patch did not apply cleanly. Carries the raw `git apply` output
    /// verbatim so a corrective retry prompt can quote it precisely.
    #[error("failed to apply patch: {output}")]
    MalformedPatch { output: String },

    #[error("image build failed for tag '{tag}': {message}")]
    ImageBuildFailed { tag: String, message: String },

    #[error("sandbox command failed: {0}")]
    ExecFailed(String),

    #[error("failed to read test report '{path}' from sandbox: {message}")]
    ReportUnavailable { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while parsing a test-runner report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("malformed XML report: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("testcase element missing required attribute '{0}'")]
    MissingAttribute(&'static str),
}

/// Errors that can occur while managing cached repository checkouts.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("git clone of '{repo}' failed: {message}")]
    CloneFailed { repo: String, message: String },

    #[error("git checkout of '{commit}' failed: {message}")]
    CheckoutFailed { commit: String, message: String },

    #[error("git reset to '{commit}' failed: {message}")]
    ResetFailed { commit: String, message: String },

    #[error("no cached checkout for ({repo}, {commit})")]
    NotCached { repo: String, commit: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while decoding structured LLM output.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no JSON object found in completion")]
    NoJson,

    #[error("completion does not match the expected schema: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API key in client configuration")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned an empty completion")]
    EmptyCompletion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_error_display() {
        let err = LocatorError::SpanNotFound { budget: 12 };
        assert!(err.to_string().contains("12 edits"));

        let err = LocatorError::BelowThreshold {
            ratio: 61,
            threshold: 80,
        };
        assert!(err.to_string().contains("61"));
        assert!(err.to_string().contains("80"));
    }

    #[test]
    fn test_malformed_patch_carries_raw_output() {
        let err = SandboxError::MalformedPatch {
            output: "error: corrupt patch at line 3".to_string(),
        };
        assert!(err.to_string().contains("corrupt patch at line 3"));
    }

    #[test]
    fn test_patch_error_wraps_locator() {
        let err: PatchError = LocatorError::EmptySnippet.into();
        assert!(matches!(err, PatchError::Locator(_)));
    }
}
