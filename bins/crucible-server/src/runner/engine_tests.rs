// End-to-end scenarios against a live Docker daemon with the language
// images built. All ignored by default; run with
// `cargo test -- --ignored` on a host with the images present.

use std::sync::Arc;

use crate::config::Config;
use crate::io::encoding::encode_base64;
use crate::lifecycle::ContainerManager;
use crate::runner::Engine;
use crate::sanitize::PermissivePolicy;
use crucible_common::types::{
    AssignmentRequest, CodeRequest, ProjectRequest, TestStatus, TEST_COMPILATION,
};

fn engine() -> Engine {
    let config = Arc::new(Config::from_env().expect("config should load"));
    let containers = ContainerManager::new().expect("docker daemon should be reachable");
    Engine::new(config, containers, Arc::new(PermissivePolicy))
}

fn code_request(code: &str) -> CodeRequest {
    CodeRequest {
        code: encode_base64(code.as_bytes()),
        is_input_base64: true,
        should_output_base64: true,
    }
}

#[tokio::test]
#[ignore] // Requires Docker and the python image
async fn python_hello_round_trips_base64() {
    let engine = engine();
    let result = engine
        .run_python_code(&code_request("print('Hello, world!')"))
        .await
        .expect("execution should succeed");
    assert_eq!(result.output, "SGVsbG8sIHdvcmxkIQo=");
}

#[tokio::test]
#[ignore] // Requires Docker and the python image
async fn python_two_file_project() {
    let engine = engine();
    let mut files = std::collections::HashMap::new();
    files.insert(
        "main.py".to_string(),
        encode_base64(b"from helper import greet\nprint(greet('world'))\n"),
    );
    files.insert(
        "helper.py".to_string(),
        encode_base64(b"def greet(name):\n    return f'Hello, {name}!'\n"),
    );

    let result = engine
        .run_python_project(&ProjectRequest {
            main_file: Some("main.py".to_string()),
            main_class_name: None,
            additional_files: files,
            input: None,
            run_method: None,
            is_input_base64: false,
            should_output_base64: false,
        })
        .await
        .expect("execution should succeed");

    assert_eq!(result.output, "Hello, world!\n");
    assert!(result.files.is_empty());
}

fn java_assignment(main_test_assertion: &str) -> AssignmentRequest {
    let main = r#"public class Main {
    public static void main(String[] args) {
        System.out.println(Helper.greet());
    }
}
"#;
    let helper = r#"public class Helper {
    public static String greet() {
        return "Hello, world";
    }
}
"#;
    let helper_test = r#"import org.junit.jupiter.api.Test;
import static org.junit.jupiter.api.Assertions.assertEquals;

public class HelperTest {
    @Test
    void testGreet() {
        assertEquals("Hello, world", Helper.greet());
    }
}
"#;
    let main_test = format!(
        r#"import org.junit.jupiter.api.Test;
import static org.junit.jupiter.api.Assertions.assertTrue;

public class MainTest {{
    @Test
    void testMainOutput() {{
        assertTrue(Helper.greet().contains("{main_test_assertion}"));
    }}
}}
"#
    );

    let mut additional_files = std::collections::HashMap::new();
    additional_files.insert("Main.java".to_string(), encode_base64(main.as_bytes()));
    additional_files.insert("Helper.java".to_string(), encode_base64(helper.as_bytes()));
    let mut test_files = std::collections::HashMap::new();
    test_files.insert(
        "HelperTest.java".to_string(),
        encode_base64(helper_test.as_bytes()),
    );
    test_files.insert(
        "MainTest.java".to_string(),
        encode_base64(main_test.as_bytes()),
    );

    AssignmentRequest {
        main_file: None,
        main_class_name: Some("Main".to_string()),
        additional_files,
        test_files,
        input: None,
        run_method: None,
        is_input_base64: false,
        should_output_base64: false,
    }
}

#[tokio::test]
#[ignore] // Requires Docker and the java junit image
async fn java_assignment_all_passing() {
    let engine = engine();
    let result = engine
        .run_java_assignment(&java_assignment("Hello, world"))
        .await
        .expect("execution should succeed");

    assert!(result.tests_passed);
    assert_eq!(result.score, 100);
    assert_eq!(result.test_results.len(), 2);
    assert!(result
        .test_results
        .iter()
        .all(|outcome| outcome.status == TestStatus::Successful));
}

#[tokio::test]
#[ignore] // Requires Docker and the java junit image
async fn java_assignment_one_failing() {
    let engine = engine();
    let result = engine
        .run_java_assignment(&java_assignment("Hello, World"))
        .await
        .expect("execution should succeed");

    assert!(!result.tests_passed);
    assert_eq!(result.score, 50);
    let failed: Vec<_> = result
        .test_results
        .iter()
        .filter(|outcome| outcome.status == TestStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].test, "testMainOutput()");
}

#[tokio::test]
#[ignore] // Requires Docker and the java junit image
async fn java_assignment_test_compile_error() {
    let engine = engine();
    let mut request = java_assignment("Hello, world");
    request.test_files.insert(
        "MainTest.java".to_string(),
        encode_base64(
            br#"public class MainTest {
    void broken() {
        Helper.noSuchMethod();
    }
}
"#,
        ),
    );

    let result = engine
        .run_java_assignment(&request)
        .await
        .expect("execution should succeed");

    assert_eq!(result.score, 0);
    assert!(!result.tests_passed);
    assert_eq!(result.test_results.len(), 1);
    assert_eq!(result.test_results[0].test, TEST_COMPILATION);
    assert_eq!(result.test_results[0].status, TestStatus::Failed);
    assert!(result.test_results[0].exception.is_some());
}

#[tokio::test]
#[ignore] // Requires Docker and the cpp doctest image
async fn cpp_assignment_doctest_all_passing() {
    let engine = engine();
    let main = r#"#include <iostream>
#include "geometry.h"

int main() {
    std::cout << "area: " << area(3, 4) << std::endl;
    return 0;
}
"#;
    let header = "int area(int w, int h);\n";
    let unit = "#include \"geometry.h\"\nint area(int w, int h) { return w * h; }\n";
    let test = r#"#define DOCTEST_CONFIG_IMPLEMENT_WITH_MAIN
#include <doctest.h>
#include "geometry.h"

TEST_CASE("area multiplies sides") {
    CHECK(area(3, 4) == 12);
}
"#;

    let mut additional_files = std::collections::HashMap::new();
    additional_files.insert("main.cpp".to_string(), encode_base64(main.as_bytes()));
    additional_files.insert("geometry.h".to_string(), encode_base64(header.as_bytes()));
    additional_files.insert("geometry.cpp".to_string(), encode_base64(unit.as_bytes()));
    let mut test_files = std::collections::HashMap::new();
    test_files.insert("test.cpp".to_string(), encode_base64(test.as_bytes()));

    let result = engine
        .run_cpp_assignment(&AssignmentRequest {
            main_file: None,
            main_class_name: None,
            additional_files,
            test_files,
            input: None,
            run_method: None,
            is_input_base64: false,
            should_output_base64: false,
        })
        .await
        .expect("execution should succeed");

    assert!(result.tests_passed);
    assert_eq!(result.score, 100);
    assert!(result.output.contains("area: 12"));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn no_containers_remain_after_a_batch_run() {
    let engine = engine();
    let _ = engine
        .run_python_code(&code_request("print('done')"))
        .await
        .expect("execution should succeed");
    assert_eq!(engine.containers.states().len(), 0);
}
