//! Harness configuration.
//!
//! All tunables live in an explicitly constructed [`HarnessConfig`] that is
//! passed down to the components that need it. There are no module-level
//! singletons; multiple independent harnesses can coexist in one process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default fuzzy-match threshold (percent) for span location.
pub const DEFAULT_FUZZY_THRESHOLD: u32 = 80;

/// Default number of corrective-retry attempts per evaluation cycle.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default test command run inside the sandbox.
pub const DEFAULT_TEST_COMMAND: &str = "pytest --junitxml=testresults.xml";

/// Path of the test report inside the sandbox, relative to the repo root.
pub const DEFAULT_REPORT_PATH: &str = "testresults.xml";

/// `git apply` invocation used inside the sandbox. The leniency flags
/// compensate for LLM-generated diffs with slightly wrong context lines.
pub const GIT_APPLY_PATCH: &str =
    "git apply file.patch --ignore-space-change --ignore-whitespace --verbose --recount --inaccurate-eof";

/// Configuration for one harness instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Fuzzy-match threshold, 0-100. Controls both the edit budget of the
    /// span search and the minimum accepted similarity ratio.
    pub fuzzy_threshold: u32,
    /// Maximum corrective-retry attempts before an evaluation is declared
    /// invalid.
    pub max_retries: u32,
    /// Test command executed inside the sandbox.
    pub test_command: String,
    /// Path of the structured test report inside the sandbox.
    pub report_path: String,
    /// Directory under which repository checkouts are cached.
    pub save_path: PathBuf,
    /// Prefix for generated container names and image tags.
    pub namespace: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            test_command: DEFAULT_TEST_COMMAND.to_string(),
            report_path: DEFAULT_REPORT_PATH.to_string(),
            save_path: PathBuf::from("./temp"),
            namespace: "swe-gym".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Sets the fuzzy-match threshold, clamped to 0-100.
    pub fn with_fuzzy_threshold(mut self, threshold: u32) -> Self {
        self.fuzzy_threshold = threshold.min(100);
        self
    }

    /// Sets the corrective-retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the test command.
    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = command.into();
        self
    }

    /// Sets the checkout cache directory.
    pub fn with_save_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = path.into();
        self
    }
}

/// Configuration for an OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl ModelConfig {
    /// Creates a model configuration with the default 60s timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.fuzzy_threshold, 80);
        assert_eq!(config.max_retries, 3);
        assert!(config.test_command.contains("junitxml"));
    }

    #[test]
    fn test_threshold_clamped() {
        let config = HarnessConfig::default().with_fuzzy_threshold(250);
        assert_eq!(config.fuzzy_threshold, 100);
    }

    #[test]
    fn test_builder_chain() {
        let config = HarnessConfig::default()
            .with_max_retries(5)
            .with_test_command("cargo test")
            .with_save_path("/tmp/checkouts");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.test_command, "cargo test");
        assert_eq!(config.save_path, PathBuf::from("/tmp/checkouts"));
    }
}
