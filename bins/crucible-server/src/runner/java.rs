// Java execution: single-file runs, multi-file projects and JUnit
// assignments.
//
// The JUnit image carries the platform jars in /junit/ plus a test
// execution listener registered through service-loader metadata; running the
// console launcher makes the listener write `test-results.json` into the
// working directory.

use crucible_common::types::{
    AssignmentOutput, AssignmentRequest, CodeRequest, ExecutionOutput, Language, ProjectOutput,
    ProjectRequest, MAIN_COMPILATION, TEST_COMPILATION,
};

use crate::error::EngineError;
use crate::io::artifacts::collect_artifacts;
use crate::io::encoding::{decode_base64_text, encode_base64};
use crate::io::workspace::{LayoutOptions, Workspace};
use crate::results;
use crate::runner::{
    input_argv, resolve_input, shape_output, Engine, INPUT_FILE, MAIN_COMPILE_ERRORS_FILE,
    PROGRAM_OUTPUT_FILE, TEST_COMPILE_ERRORS_FILE, TEST_RESULTS_FILE,
};

const JUNIT_LAUNCHER: &str = "/junit/junit-platform-console-standalone.jar";
const TEST_DIR: &str = "test";

impl Engine {
    /// Compile and run a single `Main.java`.
    pub async fn run_java_code(&self, req: &CodeRequest) -> Result<ExecutionOutput, EngineError> {
        let code = if req.is_input_base64 {
            decode_base64_text(&req.code)?
        } else {
            req.code.clone()
        };
        self.check_sizes(code.len(), 0)?;
        self.policy.inspect("Main.java", &code)?;

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.java_code(&workspace, &code, req).await;
        workspace.remove().await;
        result
    }

    async fn java_code(
        &self,
        workspace: &Workspace,
        code: &str,
        req: &CodeRequest,
    ) -> Result<ExecutionOutput, EngineError> {
        let mut files = std::collections::HashMap::new();
        files.insert("Main.java".to_string(), encode_base64(code.as_bytes()));
        workspace
            .populate(
                &files,
                self.policy.as_ref(),
                LayoutOptions {
                    decode: true,
                    ..Default::default()
                },
            )
            .await?;

        let command = "javac Main.java && java Main".to_string();
        let mut spec = self.container_spec(self.config.image_for(Language::Java, false), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;
        let output = run.output_with_timeout_note();
        run.finish(&self.containers).await;

        Ok(ExecutionOutput {
            output: shape_output(output, req.should_output_base64),
        })
    }

    pub async fn run_java_project(
        &self,
        req: &ProjectRequest,
    ) -> Result<ProjectOutput, EngineError> {
        let main_class = req
            .main_class_name
            .as_deref()
            .ok_or_else(|| EngineError::BadCommand("mainClassName is required".to_string()))?;

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.java_project(&workspace, main_class, req).await;
        workspace.remove().await;
        result
    }

    async fn java_project(
        &self,
        workspace: &Workspace,
        main_class: &str,
        req: &ProjectRequest,
    ) -> Result<ProjectOutput, EngineError> {
        workspace
            .populate(
                &req.additional_files,
                self.policy.as_ref(),
                LayoutOptions {
                    decode: true,
                    java_packages: true,
                    ..Default::default()
                },
            )
            .await?;

        let input = resolve_input(req.input.as_deref(), req.is_input_base64)?;
        self.check_sizes(0, input.as_deref().map_or(0, str::len))?;
        if let Some(input) = &input {
            workspace.write_file(INPUT_FILE, input.as_bytes()).await?;
        }

        let command = format!(
            "find . -name '*.java' -exec javac {{}} + && java -cp . {main_class}{}",
            input_argv(input.is_some())
        );
        let mut spec = self.container_spec(self.config.image_for(Language::Java, false), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;
        let files = collect_artifacts(&self.containers, &run.container, workspace).await;
        let output = run.output_with_timeout_note();
        run.finish(&self.containers).await;

        Ok(ProjectOutput {
            output: shape_output(output, req.should_output_base64),
            files,
        })
    }

    pub async fn run_java_assignment(
        &self,
        req: &AssignmentRequest,
    ) -> Result<AssignmentOutput, EngineError> {
        let main_class = req
            .main_class_name
            .as_deref()
            .ok_or_else(|| EngineError::BadCommand("mainClassName is required".to_string()))?;

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.java_assignment(&workspace, main_class, req).await;
        workspace.remove().await;
        result
    }

    async fn java_assignment(
        &self,
        workspace: &Workspace,
        main_class: &str,
        req: &AssignmentRequest,
    ) -> Result<AssignmentOutput, EngineError> {
        workspace
            .populate(
                &req.additional_files,
                self.policy.as_ref(),
                LayoutOptions {
                    decode: true,
                    java_packages: true,
                    ..Default::default()
                },
            )
            .await?;
        workspace
            .populate(
                &req.test_files,
                self.policy.as_ref(),
                LayoutOptions {
                    decode: true,
                    java_packages: true,
                    subdir: Some(TEST_DIR),
                },
            )
            .await?;

        let input = resolve_input(req.input.as_deref(), req.is_input_base64)?;
        self.check_sizes(0, input.as_deref().map_or(0, str::len))?;
        if let Some(input) = &input {
            workspace.write_file(INPUT_FILE, input.as_bytes()).await?;
        }

        let command = assignment_script(main_class, input.is_some());
        let mut spec = self.container_spec(self.config.image_for(Language::Java, true), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;

        if let Some(errors) = non_empty(workspace.read_file(MAIN_COMPILE_ERRORS_FILE).await) {
            run.finish(&self.containers).await;
            return Ok(results::compilation_failure(MAIN_COMPILATION, errors));
        }
        if let Some(errors) = non_empty(workspace.read_file(TEST_COMPILE_ERRORS_FILE).await) {
            run.finish(&self.containers).await;
            return Ok(results::compilation_failure(TEST_COMPILATION, errors));
        }

        let output = workspace
            .read_file(PROGRAM_OUTPUT_FILE)
            .await
            .unwrap_or_else(|| run.output_with_timeout_note());
        let outcomes =
            results::normalize_results_file(workspace.read_file(TEST_RESULTS_FILE).await);
        run.finish(&self.containers).await;

        Ok(results::assignment_result(
            shape_output(output, req.should_output_base64),
            outcomes,
        ))
    }
}

/// Staged assignment pipeline. Each stage echoes its elapsed milliseconds so
/// the timing shows up in the captured run output.
fn assignment_script(main_class: &str, has_input: bool) -> String {
    format!(
        "start=$(date +%s%3N)\n\
         find . -path ./{TEST_DIR} -prune -o -name '*.java' -exec javac {{}} + 2> {MAIN_COMPILE_ERRORS_FILE}\n\
         if [ -s {MAIN_COMPILE_ERRORS_FILE} ]; then exit 1; fi\n\
         echo \"Main compilation: $(($(date +%s%3N) - start)) ms\"\n\
         start=$(date +%s%3N)\n\
         find {TEST_DIR} -name '*.java' -exec javac -cp '.:/junit/*' -d {TEST_DIR} {{}} + 2> {TEST_COMPILE_ERRORS_FILE}\n\
         if [ -s {TEST_COMPILE_ERRORS_FILE} ]; then exit 1; fi\n\
         echo \"Test compilation: $(($(date +%s%3N) - start)) ms\"\n\
         start=$(date +%s%3N)\n\
         java -cp . {main_class}{input} > {PROGRAM_OUTPUT_FILE} 2>&1\n\
         echo \"Program run: $(($(date +%s%3N) - start)) ms\"\n\
         start=$(date +%s%3N)\n\
         java -jar {JUNIT_LAUNCHER} --class-path '.:/junit/*:{TEST_DIR}' --scan-class-path > /dev/null 2>&1\n\
         echo \"Test run: $(($(date +%s%3N) - start)) ms\"",
        input = input_argv(has_input)
    )
}

fn non_empty(content: Option<String>) -> Option<String> {
    content.filter(|text| !text.trim().is_empty())
}
