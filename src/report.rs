//! Test report parsing.
//!
//! Converts the JUnit-style XML emitted by the test runner into a
//! normalized per-test status map. Status precedence per test case is
//! failure > error > skipped > passed; a test case reports at most one of
//! these markers in the underlying format, so the first match wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// Status of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Error => write!(f, "error"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of a single test case: status plus the failure/error/skip text
/// when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Normalized per-test outcome map, keyed by `<classname>.<name>`.
///
/// Every `<testcase>` element in the report appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome(pub BTreeMap<String, TestCaseResult>);

impl TestOutcome {
    /// Number of test cases in the report.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the report contained no test cases.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up a single test by its fully-qualified identifier.
    pub fn get(&self, test_id: &str) -> Option<&TestCaseResult> {
        self.0.get(test_id)
    }

    /// Number of tests that failed or errored.
    pub fn num_failed(&self) -> usize {
        self.0
            .values()
            .filter(|r| matches!(r.status, TestStatus::Failed | TestStatus::Error))
            .count()
    }

    /// Fraction of tests that did not fail or error, in `[0, 1]`.
    ///
    /// An empty report scores 0.0: no evidence of success.
    pub fn pass_rate(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        (self.0.len() - self.num_failed()) as f64 / self.0.len() as f64
    }

    /// Returns true if every listed test identifier passed.
    pub fn all_passing(&self, test_ids: &[String]) -> bool {
        test_ids.iter().all(|id| {
            self.get(id)
                .map(|r| r.status == TestStatus::Passed)
                .unwrap_or(false)
        })
    }
}

/// Parses a JUnit-style XML report into a [`TestOutcome`].
///
/// # Errors
///
/// Malformed XML is fatal for the evaluation call; there is no
/// partial-credit fallback.
pub fn parse_junit_xml(xml: &str) -> Result<TestOutcome, ReportError> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut results = BTreeMap::new();

    for case in doc
        .descendants()
        .filter(|n| n.has_tag_name("testcase"))
    {
        let classname = case
            .attribute("classname")
            .ok_or(ReportError::MissingAttribute("classname"))?;
        let name = case
            .attribute("name")
            .ok_or(ReportError::MissingAttribute("name"))?;
        let test_id = format!("{classname}.{name}");

        let marker = ["failure", "error", "skipped"]
            .iter()
            .find_map(|tag| case.children().find(|c| c.has_tag_name(*tag)));

        let result = match marker {
            Some(node) => {
                let status = match node.tag_name().name() {
                    "failure" => TestStatus::Failed,
                    "error" => TestStatus::Error,
                    _ => TestStatus::Skipped,
                };
                TestCaseResult {
                    status,
                    message: node.text().map(str::to_string),
                }
            }
            None => TestCaseResult {
                status: TestStatus::Passed,
                message: None,
            },
        };
        results.insert(test_id, result);
    }

    Ok(TestOutcome(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites>
  <testsuite name="pytest" tests="4">
    <testcase classname="T" name="a"><failure>boom</failure></testcase>
    <testcase classname="T" name="b"/>
    <testcase classname="pkg.MyTest" name="c"><error>import crash</error></testcase>
    <testcase classname="pkg.MyTest" name="d"><skipped>not on CI</skipped></testcase>
  </testsuite>
</testsuites>"#;

    #[test]
    fn test_parse_statuses_and_messages() {
        let outcome = parse_junit_xml(SAMPLE).unwrap();
        assert_eq!(outcome.len(), 4);

        let a = outcome.get("T.a").unwrap();
        assert_eq!(a.status, TestStatus::Failed);
        assert_eq!(a.message.as_deref(), Some("boom"));

        let b = outcome.get("T.b").unwrap();
        assert_eq!(b.status, TestStatus::Passed);
        assert!(b.message.is_none());

        assert_eq!(outcome.get("pkg.MyTest.c").unwrap().status, TestStatus::Error);
        assert_eq!(
            outcome.get("pkg.MyTest.d").unwrap().status,
            TestStatus::Skipped
        );
    }

    #[test]
    fn test_every_testcase_appears_exactly_once() {
        let outcome = parse_junit_xml(SAMPLE).unwrap();
        let testcase_count = SAMPLE.matches("<testcase").count();
        assert_eq!(outcome.len(), testcase_count);
    }

    #[test]
    fn test_failure_beats_error() {
        // A testcase never reports both in practice; precedence still has
        // to be deterministic if one ever does.
        let xml = r#"<testsuite><testcase classname="T" name="x">
            <error>later</error><failure>first</failure>
        </testcase></testsuite>"#;
        let outcome = parse_junit_xml(xml).unwrap();
        assert_eq!(outcome.get("T.x").unwrap().status, TestStatus::Failed);
    }

    #[test]
    fn test_malformed_xml_is_fatal() {
        let err = parse_junit_xml("<testsuite><testcase").unwrap_err();
        assert!(matches!(err, ReportError::Xml(_)));
    }

    #[test]
    fn test_missing_classname_rejected() {
        let xml = r#"<testsuite><testcase name="x"/></testsuite>"#;
        let err = parse_junit_xml(xml).unwrap_err();
        assert!(matches!(err, ReportError::MissingAttribute("classname")));
    }

    #[test]
    fn test_pass_rate_and_failure_count() {
        let outcome = parse_junit_xml(SAMPLE).unwrap();
        assert_eq!(outcome.num_failed(), 2);
        assert!((outcome.pass_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pass_rate_empty_report() {
        let outcome = parse_junit_xml("<testsuite/>").unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.pass_rate(), 0.0);
    }

    #[test]
    fn test_all_passing() {
        let outcome = parse_junit_xml(SAMPLE).unwrap();
        assert!(outcome.all_passing(&["T.b".to_string()]));
        assert!(!outcome.all_passing(&["T.a".to_string(), "T.b".to_string()]));
        assert!(!outcome.all_passing(&["T.unknown".to_string()]));
    }
}
