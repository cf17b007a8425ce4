// Python execution: plain snippets, projects and unittest assignments.
//
// The unittest image ships `/custom-test-runner/json_test_runner.py`, which
// discovers `test*.py` in the working directory and writes
// `test-results.json` next to them.

use crucible_common::types::{
    AssignmentRequest, CodeRequest, ExecutionOutput, Language, ProjectRequest, ProjectOutput,
    MAIN_COMPILATION,
};

use crate::error::EngineError;
use crate::io::artifacts::collect_artifacts;
use crate::io::encoding::decode_base64_text;
use crate::io::workspace::{LayoutOptions, Workspace};
use crate::results;
use crate::runner::{
    input_argv, module_name, resolve_input, shape_output, Engine, INPUT_FILE,
    MAIN_COMPILE_ERRORS_FILE, PROGRAM_OUTPUT_FILE, TEST_RESULTS_FILE,
};

const TEST_RUNNER_PATH: &str = "/custom-test-runner/json_test_runner.py";

impl Engine {
    /// `python -c "<code>"` in a bare container, no workspace.
    pub async fn run_python_code(
        &self,
        req: &CodeRequest,
    ) -> Result<ExecutionOutput, EngineError> {
        let code = if req.is_input_base64 {
            decode_base64_text(&req.code)?
        } else {
            req.code.clone()
        };
        self.check_sizes(code.len(), 0)?;
        self.policy.inspect("code", &code)?;

        let mut spec =
            self.container_spec(self.config.image_for(Language::Python, false), String::new());
        spec.cmd = Some(vec!["python".to_string(), "-c".to_string(), code]);
        spec.working_dir = None;

        let run = self.run_to_completion(spec).await?;
        let output = run.output_with_timeout_note();
        run.finish(&self.containers).await;

        Ok(ExecutionOutput {
            output: shape_output(output, req.should_output_base64),
        })
    }

    pub async fn run_python_project(
        &self,
        req: &ProjectRequest,
    ) -> Result<ProjectOutput, EngineError> {
        let main_file = req
            .main_file
            .as_deref()
            .ok_or_else(|| EngineError::BadCommand("mainFile is required".to_string()))?;

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.python_project(&workspace, main_file, req).await;
        workspace.remove().await;
        result
    }

    async fn python_project(
        &self,
        workspace: &Workspace,
        main_file: &str,
        req: &ProjectRequest,
    ) -> Result<ProjectOutput, EngineError> {
        workspace
            .populate(
                &req.additional_files,
                self.policy.as_ref(),
                LayoutOptions {
                    decode: true,
                    ..Default::default()
                },
            )
            .await?;

        let input = resolve_input(req.input.as_deref(), req.is_input_base64)?;
        self.check_sizes(0, input.as_deref().map_or(0, str::len))?;
        if let Some(input) = &input {
            workspace.write_file(INPUT_FILE, input.as_bytes()).await?;
        }

        let command = program_stage(main_file, req.run_method.as_deref(), input.is_some());
        let mut spec =
            self.container_spec(self.config.image_for(Language::Python, false), command);
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

    pub async fn run_python_assignment(
        &self,
        req: &AssignmentRequest,
    ) -> Result<crucible_common::types::AssignmentOutput, EngineError> {
        let main_file = req.main_file.as_deref().unwrap_or("main.py");

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.python_assignment(&workspace, main_file, req).await;
        workspace.remove().await;
        result
    }

    async fn python_assignment(
        &self,
        workspace: &Workspace,
        main_file: &str,
        req: &AssignmentRequest,
    ) -> Result<crucible_common::types::AssignmentOutput, EngineError> {
        let layout = LayoutOptions {
            decode: true,
            ..Default::default()
        };
        workspace
            .populate(&req.additional_files, self.policy.as_ref(), layout)
            .await?;
        workspace
            .populate(&req.test_files, self.policy.as_ref(), layout)
            .await?;

        let input = resolve_input(req.input.as_deref(), req.is_input_base64)?;
        self.check_sizes(0, input.as_deref().map_or(0, str::len))?;
        if let Some(input) = &input {
            workspace.write_file(INPUT_FILE, input.as_bytes()).await?;
        }

        let command = assignment_script(main_file, req.run_method.as_deref(), input.is_some());
        let mut spec =
            self.container_spec(self.config.image_for(Language::Python, true), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;

        if let Some(errors) = non_empty(workspace.read_file(MAIN_COMPILE_ERRORS_FILE).await) {
            run.finish(&self.containers).await;
            return Ok(results::compilation_failure(MAIN_COMPILATION, errors));
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

/// The command that runs the student program: either the main file itself or
/// a named callable imported from it.
fn program_stage(main_file: &str, run_method: Option<&str>, has_input: bool) -> String {
    match run_method {
        Some(method) => {
            let module = module_name(main_file);
            let arg = if has_input {
                format!("open('{INPUT_FILE}').read()")
            } else {
                String::new()
            };
            format!("python -c \"from {module} import {method}; print({method}({arg}))\"")
        }
        None => format!("python {main_file}{}", input_argv(has_input)),
    }
}

/// Full assignment pipeline: static check, program run, test discovery.
fn assignment_script(main_file: &str, run_method: Option<&str>, has_input: bool) -> String {
    let program = program_stage(main_file, run_method, has_input);
    format!(
        "pyflakes . > {MAIN_COMPILE_ERRORS_FILE} 2>&1\n\
         if [ -s {MAIN_COMPILE_ERRORS_FILE} ]; then exit 1; fi\n\
         {program} > {PROGRAM_OUTPUT_FILE} 2>&1\n\
         python {TEST_RUNNER_PATH}"
    )
}

fn non_empty(content: Option<String>) -> Option<String> {
    content.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_program_stage_passes_input_as_argv() {
        assert_eq!(program_stage("main.py", None, false), "python main.py");
        assert_eq!(
            program_stage("main.py", None, true),
            "python main.py \"$(cat input.txt)\""
        );
    }

    #[test]
    fn run_method_stage_imports_the_callable() {
        assert_eq!(
            program_stage("main.py", Some("greet"), false),
            "python -c \"from main import greet; print(greet())\""
        );
        assert_eq!(
            program_stage("main.py", Some("greet"), true),
            "python -c \"from main import greet; print(greet(open('input.txt').read()))\""
        );
    }

    #[test]
    fn assignment_script_gates_on_pyflakes() {
        let script = assignment_script("main.py", None, false);
        let lines: Vec<&str> = script.lines().collect();
        assert!(lines[0].starts_with("pyflakes . > main_compile_errors.txt"));
        assert!(lines[1].contains("exit 1"));
        assert!(lines[2].starts_with("python main.py > program_output.txt"));
        assert_eq!(lines[3], "python /custom-test-runner/json_test_runner.py");
    }
}
