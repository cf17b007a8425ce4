use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Languages the engine can compile and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Cpp,
}

impl Language {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" => Some(Language::Python),
            "java" => Some(Language::Java),
            "cpp" | "c++" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn all_variants() -> &'static [Language] {
        &[Language::Python, Language::Java, Language::Cpp]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Java => write!(f, "java"),
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

/// Outcome vocabulary shared by all test frameworks.
///
/// JUnit reports `SUCCESSFUL`/`FAILED`/`ABORTED` natively; the Python
/// unittest runner reports `ERROR` for unexpected exceptions, which maps
/// onto `ABORTED` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    #[serde(rename = "SUCCESSFUL")]
    Successful,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "ABORTED", alias = "ERROR")]
    Aborted,
}

/// One normalized test result, independent of the framework that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test: String,
    pub status: TestStatus,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Successful
    }
}

/// Synthetic outcome names used when a compile stage fails before any test
/// framework runs.
pub const MAIN_COMPILATION: &str = "MAIN_COMPILATION";
pub const TEST_COMPILATION: &str = "TEST_COMPILATION";
pub const COMPILATION: &str = "Compilation";

/// Body of a plain code execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRequest {
    pub code: String,
    #[serde(default)]
    pub is_input_base64: bool,
    #[serde(default)]
    pub should_output_base64: bool,
}

/// Body of a project execution request. `main_file` designates the entry
/// point for Python and C++; Java uses `main_class_name` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRequest {
    #[serde(default)]
    pub main_file: Option<String>,
    #[serde(default)]
    pub main_class_name: Option<String>,
    /// All source files, base64-encoded, keyed by relative file name.
    #[serde(default)]
    pub additional_files: HashMap<String, String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub run_method: Option<String>,
    #[serde(default)]
    pub is_input_base64: bool,
    #[serde(default)]
    pub should_output_base64: bool,
}

/// Body of an assignment execution request: a project plus its test suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    #[serde(default)]
    pub main_file: Option<String>,
    #[serde(default)]
    pub main_class_name: Option<String>,
    #[serde(default)]
    pub additional_files: HashMap<String, String>,
    /// Test sources, base64-encoded.
    #[serde(default)]
    pub test_files: HashMap<String, String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub run_method: Option<String>,
    #[serde(default)]
    pub is_input_base64: bool,
    #[serde(default)]
    pub should_output_base64: bool,
}

/// A file generated by the executed program, collected from the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactFile {
    pub mime_type: String,
    /// Base64-encoded file bytes.
    pub content_b64: String,
}

/// Result of a plain code execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub output: String,
}

/// Result of a project execution: captured output plus generated artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutput {
    pub output: String,
    pub files: HashMap<String, ArtifactFile>,
}

/// Result of an assignment execution: output plus normalized test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentOutput {
    pub output: String,
    pub test_results: Vec<TestOutcome>,
    pub tests_passed: bool,
    /// Percentage of passing tests, 0..=100.
    pub score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips_through_strings() {
        for lang in Language::all_variants() {
            assert_eq!(Language::from_str(&lang.to_string()), Some(*lang));
        }
        assert_eq!(Language::from_str("c++"), Some(Language::Cpp));
        assert_eq!(Language::from_str("kotlin"), None);
    }

    #[test]
    fn test_status_accepts_python_error_alias() {
        let outcome: TestOutcome = serde_json::from_str(
            r#"{"test": "test_divide (test_main.MainTest)", "status": "ERROR", "error": "ZeroDivisionError"}"#,
        )
        .unwrap();
        assert_eq!(outcome.status, TestStatus::Aborted);
        assert_eq!(outcome.exception.as_deref(), Some("ZeroDivisionError"));
    }

    #[test]
    fn test_outcome_serializes_junit_vocabulary() {
        let outcome = TestOutcome {
            test: "testGreet()".to_string(),
            status: TestStatus::Successful,
            exception: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"test":"testGreet()","status":"SUCCESSFUL"}"#);
    }

    #[test]
    fn artifact_file_uses_documented_wire_names() {
        let artifact = ArtifactFile {
            mime_type: "image/png".to_string(),
            content_b64: "iVBORw0KGgo=".to_string(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["mimeType"], "image/png");
        assert_eq!(json["contentB64"], "iVBORw0KGgo=");
    }

    #[test]
    fn assignment_output_uses_camel_case_wire_names() {
        let out = AssignmentOutput {
            output: String::new(),
            test_results: vec![],
            tests_passed: false,
            score: 0,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("testResults").is_some());
        assert!(json.get("testsPassed").is_some());
    }
}
