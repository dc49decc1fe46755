mod common;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{with_captured_logs, write_script, CountingFetcher};
use gfauto_core::binaries::{BinaryManager, BinaryReference, BinarySource, SourcePriority};
use gfauto_core::interrupt::InterruptLatch;
use gfauto_core::logging::LogStack;
use gfauto_core::platform::Platform;
use gfauto_core::services::reduce::{
    build_reduce_command, run_reduce, ReduceError, ReduceOptions, COMMAND_LOG, SHADER_JOB,
};
use tempfile::{tempdir, TempDir};

struct Fixture {
    dir: TempDir,
    manager: BinaryManager,
}

impl Fixture {
    /// A test in `source/` with shader job `variant`, and a graphicsfuzz-tool
    /// install whose glsl-reduce runs `reducer_body`.
    fn new(reducer_body: &str) -> Self {
        let dir = tempdir().unwrap();
        let drivers = dir.path().join("graphicsfuzz/python/drivers");
        let tool = write_script(&drivers.join("graphicsfuzz-tool"), "exit 0");
        let args_file = dir.path().join("reducer-args.txt");
        write_script(
            &drivers.join("glsl-reduce"),
            &format!("printf '%s\\n' \"$@\" > '{}'\n{}", args_file.display(), reducer_body),
        );

        let variant = dir.path().join("source").join("variant");
        fs::create_dir_all(&variant).unwrap();
        fs::write(variant.join(SHADER_JOB), "{}").unwrap();
        fs::write(variant.join("shader.frag"), "void main() {}").unwrap();

        let manager = BinaryManager::new(
            vec![BinarySource::new(
                SourcePriority::Override,
                vec![BinaryReference::new("graphicsfuzz-tool", "local").with_path(tool)],
            )],
            Platform::Linux,
            common::store(&dir.path().join("cache"), Arc::new(CountingFetcher::default())),
        );
        Self { dir, manager }
    }

    fn source(&self) -> PathBuf {
        self.dir.path().join("source")
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("reduction")
    }

    fn reducer_args(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("reducer-args.txt"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn as_strings(cmd: &[OsString]) -> Vec<String> {
    cmd.iter().map(|a| a.to_string_lossy().to_string()).collect()
}

#[test]
fn failing_reducer_still_returns_output_dir_with_log() {
    let fixture = Fixture::new("exit 1");
    let log = LogStack::new();

    let output = run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &ReduceOptions::default(),
        &log,
    )
    .expect("reducer exit code is not a driver failure");

    assert_eq!(output, fixture.output());
    let command_log = fs::read_to_string(output.join(COMMAND_LOG)).unwrap();
    assert!(!command_log.is_empty());
    assert!(command_log.contains("Exec (verbose):"));
    assert!(command_log.contains("RETURNCODE: 1"));
    assert_eq!(log.depth(), 0, "command.log must be popped after the run");
}

#[test]
fn reducer_output_is_captured_in_command_log() {
    let fixture = Fixture::new("echo 'reducing step 1'\necho 'oops' >&2\nexit 0");
    let output = run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &ReduceOptions::default(),
        &LogStack::new(),
    )
    .unwrap();

    let command_log = fs::read_to_string(output.join(COMMAND_LOG)).unwrap();
    assert!(command_log.contains("reducing step 1"));
    assert!(command_log.contains("oops"));
    assert!(command_log.contains("RETURNCODE: 0"));
}

#[test]
fn reducer_receives_interestingness_test_after_separator() {
    let fixture = Fixture::new("exit 0");
    let options = ReduceOptions {
        extra_args: vec!["--max-steps".to_string(), "50".to_string()],
        ..ReduceOptions::default()
    };
    run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &options,
        &LogStack::new(),
    )
    .unwrap();

    let source = fixture.source();
    assert_eq!(
        fixture.reducer_args(),
        vec![
            source.join("variant").join(SHADER_JOB).display().to_string(),
            "--output".to_string(),
            fixture.output().display().to_string(),
            "--max-steps".to_string(),
            "50".to_string(),
            "--".to_string(),
            "gfauto_interestingness_test".to_string(),
            source.display().to_string(),
            "--override_shader_job".to_string(),
            "variant".to_string(),
        ]
    );
}

#[test]
fn preserve_semantics_flag_is_added_only_when_requested() {
    let reducer = Path::new("/tools/glsl-reduce");
    let source = Path::new("/work/source");
    let output = Path::new("/work/out");

    let defaults = ReduceOptions::default();
    let default_cmd =
        as_strings(&build_reduce_command(reducer, source, "variant", output, &defaults));
    assert!(!default_cmd.contains(&"--preserve-semantics".to_string()));

    let options = ReduceOptions { preserve_semantics: true, ..ReduceOptions::default() };
    let cmd = as_strings(&build_reduce_command(reducer, source, "variant", output, &options));
    let flag = cmd.iter().position(|a| a == "--preserve-semantics").expect("flag present");
    let separator = cmd.iter().position(|a| a == "--").unwrap();
    assert!(flag < separator);
    assert_eq!(cmd[0], "/tools/glsl-reduce");
    assert_eq!(cmd[1], "/work/source/variant/shader.json");
}

#[test]
fn missing_shader_job_is_an_error() {
    let fixture = Fixture::new("exit 0");
    let err = run_reduce(
        &fixture.source(),
        "reference",
        &fixture.output(),
        &fixture.manager,
        &ReduceOptions::default(),
        &LogStack::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ReduceError::MissingShaderJob(_)));
    assert_eq!(err.kind(), "missing_shader_job");
    assert!(!fixture.output().exists());
}

#[test]
fn missing_reducer_tool_is_reported() {
    let fixture = Fixture::new("exit 0");
    let options =
        ReduceOptions { reducer_tool: "spirv-reduce".to_string(), ..ReduceOptions::default() };
    let err = run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &options,
        &LogStack::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ReduceError::ToolNotFound { ref tool, .. } if tool == "spirv-reduce"));
}

#[test]
fn unresolvable_reducer_binary_is_a_binary_error() {
    let fixture = Fixture::new("exit 0");
    let options = ReduceOptions { reducer_binary: "amber".to_string(), ..ReduceOptions::default() };
    let err = run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &options,
        &LogStack::new(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "binary_not_found");
}

#[test]
fn interrupted_latch_prevents_starting_the_reducer() {
    let fixture = Fixture::new("exit 0");
    let latch = InterruptLatch::new();
    latch.trigger();
    let options = ReduceOptions { interrupt: Some(latch), ..ReduceOptions::default() };

    let err = run_reduce(
        &fixture.source(),
        "variant",
        &fixture.output(),
        &fixture.manager,
        &options,
        &LogStack::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ReduceError::Interrupted(_)));
    assert!(!fixture.output().exists());
}

#[test]
fn interrupt_during_reduction_lets_the_reducer_finish_and_is_logged() {
    let markers = tempdir().unwrap();
    let started = markers.path().join("started");
    let fixture = Fixture::new(&format!("touch '{}'\nsleep 1\necho done", started.display()));
    let latch = InterruptLatch::new();
    let options = ReduceOptions { interrupt: Some(latch.clone()), ..ReduceOptions::default() };

    let trigger = {
        let started = started.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            while !started.exists() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            latch.trigger();
        })
    };
    let (result, logs) = with_captured_logs(|| {
        run_reduce(
            &fixture.source(),
            "variant",
            &fixture.output(),
            &fixture.manager,
            &options,
            &LogStack::new(),
        )
    });
    trigger.join().unwrap();

    assert_eq!(result.unwrap(), fixture.output());
    let command_log = fs::read_to_string(fixture.output().join(COMMAND_LOG)).unwrap();
    assert!(command_log.contains("done"), "{command_log}");
    assert!(logs.text().contains("Interrupt received"), "{}", logs.text());
    assert!(options.interrupt.as_ref().unwrap().interrupted());
}
