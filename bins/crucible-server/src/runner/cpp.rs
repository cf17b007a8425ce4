// C++ execution: single-file runs, multi-file projects and doctest
// assignments.
//
// The doctest image has the doctest headers precompiled plus a JSON
// reporter; running the test binary with the json reporter selected writes
// `test-results.json` into the working directory.

use crucible_common::types::{
    AssignmentOutput, AssignmentRequest, CodeRequest, ExecutionOutput, Language, ProjectOutput,
    ProjectRequest, COMPILATION, TEST_COMPILATION,
};

use crate::error::EngineError;
use crate::io::artifacts::collect_artifacts;
use crate::io::encoding::{decode_base64_text, encode_base64};
use crate::io::workspace::{LayoutOptions, Workspace};
use crate::results;
use crate::runner::{
    input_argv, resolve_input, shape_output, shell_quote, Engine, COMPILE_ERRORS_FILE, INPUT_FILE,
    PROGRAM_OUTPUT_FILE, TEST_COMPILE_ERRORS_FILE, TEST_RESULTS_FILE,
};

const MAIN_SOURCE: &str = "main.cpp";
const TEST_SOURCE: &str = "test.cpp";

impl Engine {
    /// Compile and run a single `main.cpp`.
    pub async fn run_cpp_code(&self, req: &CodeRequest) -> Result<ExecutionOutput, EngineError> {
        let code = if req.is_input_base64 {
            decode_base64_text(&req.code)?
        } else {
            req.code.clone()
        };
        self.check_sizes(code.len(), 0)?;
        self.policy.inspect(MAIN_SOURCE, &code)?;

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.cpp_code(&workspace, &code, req).await;
        workspace.remove().await;
        result
    }

    async fn cpp_code(
        &self,
        workspace: &Workspace,
        code: &str,
        req: &CodeRequest,
    ) -> Result<ExecutionOutput, EngineError> {
        let mut files = std::collections::HashMap::new();
        files.insert(MAIN_SOURCE.to_string(), encode_base64(code.as_bytes()));
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

        let command = format!("g++ -o main {MAIN_SOURCE} && ./main");
        let mut spec = self.container_spec(self.config.image_for(Language::Cpp, false), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;
        let output = run.output_with_timeout_note();
        run.finish(&self.containers).await;

        Ok(ExecutionOutput {
            output: shape_output(output, req.should_output_base64),
        })
    }

    pub async fn run_cpp_project(
        &self,
        req: &ProjectRequest,
    ) -> Result<ProjectOutput, EngineError> {
        let main_file = req.main_file.as_deref().unwrap_or(MAIN_SOURCE);

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.cpp_project(&workspace, main_file, req).await;
        workspace.remove().await;
        result
    }

    async fn cpp_project(
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

        let units = source_units(&req.additional_files, main_file);
        let command = format!(
            "g++ -o main {} && ./main{}",
            compile_list(main_file, &units),
            input_argv(input.is_some())
        );
        let mut spec = self.container_spec(self.config.image_for(Language::Cpp, false), command);
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

    pub async fn run_cpp_assignment(
        &self,
        req: &AssignmentRequest,
    ) -> Result<AssignmentOutput, EngineError> {
        let main_file = req.main_file.as_deref().unwrap_or(MAIN_SOURCE);

        let workspace = Workspace::create(&self.config.tmp_dir).await?;
        let result = self.cpp_assignment(&workspace, main_file, req).await;
        workspace.remove().await;
        result
    }

    async fn cpp_assignment(
        &self,
        workspace: &Workspace,
        main_file: &str,
        req: &AssignmentRequest,
    ) -> Result<AssignmentOutput, EngineError> {
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

        let units = source_units(&req.additional_files, main_file);
        let command = assignment_script(main_file, &units, input.is_some());
        let mut spec = self.container_spec(self.config.image_for(Language::Cpp, true), command);
        spec.binds.push(workspace.bind_mount());

        let run = self.run_to_completion(spec).await?;

        if let Some(errors) = non_empty(workspace.read_file(COMPILE_ERRORS_FILE).await) {
            run.finish(&self.containers).await;
            return Ok(results::compilation_failure(COMPILATION, errors));
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

/// Additional translation units, deterministic order, main file excluded.
fn source_units(files: &std::collections::HashMap<String, String>, main_file: &str) -> Vec<String> {
    let mut units: Vec<String> = files
        .keys()
        .filter(|name| name.ends_with(".cpp") && *name != main_file && *name != TEST_SOURCE)
        .cloned()
        .collect();
    units.sort();
    units
}

fn compile_list(main_file: &str, units: &[String]) -> String {
    let mut list = shell_quote(main_file);
    for unit in units {
        list.push(' ');
        list.push_str(&shell_quote(unit));
    }
    list
}

/// Compile the program, run it, compile the doctest binary against the
/// program units, and run it with the json reporter selected.
fn assignment_script(main_file: &str, units: &[String], has_input: bool) -> String {
    let program_sources = compile_list(main_file, units);
    let test_sources = if units.is_empty() {
        shell_quote(TEST_SOURCE)
    } else {
        format!("{} {}", shell_quote(TEST_SOURCE), {
            let mut list = String::new();
            for (i, unit) in units.iter().enumerate() {
                if i > 0 {
                    list.push(' ');
                }
                list.push_str(&shell_quote(unit));
            }
            list
        })
    };
    format!(
        "g++ -o program {program_sources} 2> {COMPILE_ERRORS_FILE}\n\
         if [ -s {COMPILE_ERRORS_FILE} ]; then exit 1; fi\n\
         ./program{input} > {PROGRAM_OUTPUT_FILE} 2>&1\n\
         g++ -o tests {test_sources} 2> {TEST_COMPILE_ERRORS_FILE}\n\
         if [ -s {TEST_COMPILE_ERRORS_FILE} ]; then exit 1; fi\n\
         ./tests -r json > /dev/null 2>&1",
        input = input_argv(has_input)
    )
}

fn non_empty(content: Option<String>) -> Option<String> {
    content.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn files(names: &[&str]) -> HashMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), String::new()))
            .collect()
    }

    #[test]
    fn source_units_exclude_main_and_test_sources() {
        let files = files(&["main.cpp", "geometry.cpp", "util.cpp", "test.cpp", "readme.md"]);
        assert_eq!(source_units(&files, "main.cpp"), vec!["geometry.cpp", "util.cpp"]);
    }

    #[test]
    fn compile_list_quotes_every_source() {
        let units = vec!["geometry.cpp".to_string()];
        assert_eq!(compile_list("main.cpp", &units), "'main.cpp' 'geometry.cpp'");
    }

    #[test]
    fn assignment_script_links_tests_with_program_units() {
        let units = vec!["geometry.cpp".to_string()];
        let script = assignment_script("main.cpp", &units, false);
        assert!(script.contains("g++ -o program 'main.cpp' 'geometry.cpp' 2> compile_errors.txt"));
        assert!(script.contains("g++ -o tests 'test.cpp' 'geometry.cpp' 2> test_compile_errors.txt"));
        assert!(script.ends_with("./tests -r json > /dev/null 2>&1"));
    }

    #[test]
    fn assignment_script_captures_program_output() {
        let script = assignment_script("main.cpp", &[], true);
        assert!(script.contains("./program \"$(cat input.txt)\" > program_output.txt 2>&1"));
    }
}
