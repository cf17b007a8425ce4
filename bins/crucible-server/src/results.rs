// Normalization of per-language test output into the uniform result schema.
//
// Each assignment image's test framework writes `test-results.json` into the
// workspace: the JUnit listener, the unittest JSON runner, and the doctest
// JSON reporter all emit a list of `{test, status, ...}` objects, with small
// dialect differences absorbed by the serde aliases on `TestOutcome`.
// Everything downstream consumes the normalized list.

use anyhow::Context;
use tracing::warn;

use crucible_common::types::{AssignmentOutput, TestOutcome, TestStatus};

/// Parse a `test-results.json` payload.
pub fn parse_test_results(raw: &str) -> anyhow::Result<Vec<TestOutcome>> {
    serde_json::from_str(raw).context("malformed test-results.json")
}

/// Aggregate outcomes into the pass flag and the 0..=100 score.
pub fn aggregate(outcomes: &[TestOutcome]) -> (bool, u32) {
    let total = outcomes.len() as u32;
    if total == 0 {
        return (false, 0);
    }
    let passed = outcomes.iter().filter(|o| o.passed()).count() as u32;
    (passed == total, passed * 100 / total)
}

/// Assemble the assignment result from program output and framework
/// outcomes.
pub fn assignment_result(output: String, outcomes: Vec<TestOutcome>) -> AssignmentOutput {
    let (tests_passed, score) = aggregate(&outcomes);
    AssignmentOutput {
        output,
        test_results: outcomes,
        tests_passed,
        score,
    }
}

/// Assignment result for a compile stage that failed before any framework
/// ran: one synthetic failed outcome carrying the compiler diagnostics, and
/// the diagnostics verbatim as the response output.
pub fn compilation_failure(stage: &str, diagnostics: String) -> AssignmentOutput {
    AssignmentOutput {
        output: diagnostics.clone(),
        test_results: vec![TestOutcome {
            test: stage.to_string(),
            status: TestStatus::Failed,
            exception: Some(diagnostics),
        }],
        tests_passed: false,
        score: 0,
    }
}

/// Read and normalize `test-results.json` content; a missing or unreadable
/// file yields no outcomes (and therefore a zero score).
pub fn normalize_results_file(raw: Option<String>) -> Vec<TestOutcome> {
    match raw {
        Some(raw) => match parse_test_results(&raw) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "could not parse test results");
                Vec::new()
            }
        },
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_common::types::{MAIN_COMPILATION, TEST_COMPILATION};

    fn outcome(test: &str, status: TestStatus) -> TestOutcome {
        TestOutcome {
            test: test.to_string(),
            status,
            exception: None,
        }
    }

    #[test]
    fn junit_results_parse() {
        let raw = r#"[
            {"test": "testGreet()", "status": "SUCCESSFUL"},
            {"test": "testMainOutput()", "status": "FAILED", "exception": "expected <Hello, World> but was <Hello, world>"}
        ]"#;
        let outcomes = parse_test_results(raw).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].test, "testGreet()");
        assert!(outcomes[0].passed());
        assert!(!outcomes[1].passed());
        assert!(outcomes[1].exception.as_deref().unwrap().contains("Hello"));
    }

    #[test]
    fn unittest_error_dialect_normalizes_to_aborted() {
        let raw = r#"[
            {"test": "test_divide (test_main.MainTest)", "status": "ERROR", "error": "ZeroDivisionError: division by zero"}
        ]"#;
        let outcomes = parse_test_results(raw).unwrap();
        assert_eq!(outcomes[0].status, TestStatus::Aborted);
        assert_eq!(
            outcomes[0].exception.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
    }

    #[test]
    fn doctest_results_with_extra_fields_parse() {
        let raw = r#"[{"test": "addition works", "status": "SUCCESSFUL", "filters": []}]"#;
        let outcomes = parse_test_results(raw).unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    #[test]
    fn all_passing_scores_one_hundred() {
        let outcomes = vec![
            outcome("testGreet()", TestStatus::Successful),
            outcome("testMainOutput()", TestStatus::Successful),
        ];
        let (passed, score) = aggregate(&outcomes);
        assert!(passed);
        assert_eq!(score, 100);
    }

    #[test]
    fn half_passing_scores_fifty() {
        let outcomes = vec![
            outcome("testGreet()", TestStatus::Successful),
            outcome("testMainOutput()", TestStatus::Failed),
        ];
        let (passed, score) = aggregate(&outcomes);
        assert!(!passed);
        assert_eq!(score, 50);
    }

    #[test]
    fn aborted_tests_do_not_count_as_passed() {
        let outcomes = vec![
            outcome("a", TestStatus::Successful),
            outcome("b", TestStatus::Aborted),
            outcome("c", TestStatus::Successful),
        ];
        let (passed, score) = aggregate(&outcomes);
        assert!(!passed);
        assert_eq!(score, 66);
    }

    #[test]
    fn zero_tests_never_pass() {
        let (passed, score) = aggregate(&[]);
        assert!(!passed);
        assert_eq!(score, 0);

        let result = assignment_result("output".into(), vec![]);
        assert!(!result.tests_passed);
        assert_eq!(result.score, 0);
    }

    #[test]
    fn compilation_failure_is_a_single_synthetic_outcome() {
        let diagnostics = "Main.java:3: error: ';' expected".to_string();
        let result = compilation_failure(MAIN_COMPILATION, diagnostics.clone());
        assert_eq!(result.score, 0);
        assert!(!result.tests_passed);
        assert_eq!(result.output, diagnostics);
        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.test_results[0].test, MAIN_COMPILATION);
        assert_eq!(result.test_results[0].status, TestStatus::Failed);
        assert_eq!(result.test_results[0].exception.as_deref(), Some(diagnostics.as_str()));
    }

    #[test]
    fn test_compilation_stage_uses_its_own_name() {
        let result = compilation_failure(TEST_COMPILATION, "missing symbol".into());
        assert_eq!(result.test_results[0].test, TEST_COMPILATION);
    }

    #[test]
    fn unreadable_results_yield_no_outcomes() {
        assert!(normalize_results_file(None).is_empty());
        assert!(normalize_results_file(Some("not json".into())).is_empty());
    }

    #[test]
    fn identical_inputs_aggregate_identically() {
        let outcomes = vec![
            outcome("a", TestStatus::Successful),
            outcome("b", TestStatus::Failed),
        ];
        assert_eq!(aggregate(&outcomes), aggregate(&outcomes.clone()));
    }
}
