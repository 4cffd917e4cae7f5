//! Run command resolution.
//!
//! A [`RunCommand`] is resolved once per unit at start time and invoked for
//! every trigger. It holds only immutable state, so concurrent invocations
//! of the same unit are independent as long as the runner spawns a fresh
//! process per call, which every stock runner does.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use crate::backends::{BackendRegistry, Invocation, InvocationEvents, Runner};
use crate::build::EXECUTABLE_NAME;
use crate::config::{UnitConfig, UnitKind, is_unit_name};

/// Errors that can occur while resolving a unit's run command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No tool, extension runner or compiled artifact applies to the unit.
    RunCommandUnknown { name: String, kind: UnitKind },
    /// The unit name is not a single path component.
    InvalidName { name: String, kind: UnitKind },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunCommandUnknown { name, kind } => {
                write!(f, "[{} {}] [Error] run command is unknown", name, kind)
            }
            Self::InvalidName { name, kind } => {
                write!(f, "[{} {}] [Error] invalid unit name", name, kind)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Reports a unit's invocation events to the log, tagged by unit identity.
#[derive(Debug, Clone)]
pub struct UnitReporter {
    name: String,
    kind: UnitKind,
}

impl UnitReporter {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// The error payload delivered to a trigger when an invocation fails.
    pub fn envelope(&self, message: &str, cause: &str) -> String {
        serde_json::json!({
            "error": format!("[{} {}] [Error] {}: {}", self.name, self.kind, message, cause),
        })
        .to_string()
    }
}

impl InvocationEvents for UnitReporter {
    fn error(&self, message: &str, cause: &str) -> String {
        let envelope = self.envelope(message, cause);
        error!(unit = %self.name, kind = %self.kind, "{}", envelope);
        envelope
    }

    fn log(&self, message: &str) {
        debug!(unit = %self.name, kind = %self.kind, "{}", message);
    }
}

/// A resolved, reusable invocation of one unit.
#[derive(Clone)]
pub struct RunCommand {
    reporter: UnitReporter,
    artifact: PathBuf,
    args: Vec<String>,
    runner: Arc<dyn Runner>,
}

impl fmt::Debug for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCommand")
            .field("unit", &self.reporter.name)
            .field("kind", &self.reporter.kind)
            .field("artifact", &self.artifact)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl RunCommand {
    pub fn new(
        name: impl Into<String>,
        kind: UnitKind,
        artifact: PathBuf,
        args: Vec<String>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            reporter: UnitReporter::new(name, kind),
            artifact,
            args,
            runner,
        }
    }

    pub fn name(&self) -> &str {
        &self.reporter.name
    }

    pub fn kind(&self) -> UnitKind {
        self.reporter.kind
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run the unit once, reading its input from `input` and streaming its
    /// output, or the error envelope on failure, into `output`.
    pub async fn invoke<W, R>(&self, output: &mut W, input: &mut R)
    where
        W: AsyncWrite + Send + Unpin,
        R: AsyncRead + Send + Unpin,
    {
        let mut invocation = Invocation::new(output, input, &self.reporter);
        self.runner
            .run(&self.artifact, &mut invocation, &self.args)
            .await;
    }
}

/// Resolve the run command of one unit.
///
/// The unit counts as built when its extension has a registered builder or
/// it names a `build.tool`; built units run `<units_root>/<name>/executable`,
/// others their copied source. Runner priority: `run.tool`, then the
/// extension runner, then direct execution for built units.
pub fn resolve(
    kind: UnitKind,
    units_root: &Path,
    name: &str,
    unit: &UnitConfig,
    registry: &BackendRegistry,
) -> Result<RunCommand, ResolveError> {
    if !is_unit_name(name) {
        return Err(ResolveError::InvalidName {
            name: name.to_string(),
            kind,
        });
    }

    let built = registry.has_builder(&unit.file) || unit.build_tool().is_some();

    let unit_dir = units_root.join(name);
    let artifact = if built {
        unit_dir.join(EXECUTABLE_NAME)
    } else {
        unit_dir.join(unit.basename())
    };

    let runner = match unit.run_tool() {
        Some(tool) => Some(registry.tool_runner(tool)),
        None => registry.runner_for(&unit.file),
    };

    let runner = match runner {
        Some(runner) => runner,
        None if built => registry.executable_runner(),
        None => {
            return Err(ResolveError::RunCommandUnknown {
                name: name.to_string(),
                kind,
            });
        }
    };

    Ok(RunCommand::new(
        name,
        kind,
        artifact,
        unit.run_args().to_vec(),
        runner,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BuildError, Builder, InterpreterRunner};
    use crate::config::{BuildOptions, RunOptions};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NoopBuilder;

    #[async_trait]
    impl Builder for NoopBuilder {
        async fn build(&self, _: &Path, _: &Path, _: &[String]) -> Result<(), BuildError> {
            Ok(())
        }
    }

    /// Records the artifact path and arguments it was invoked with.
    #[derive(Default)]
    struct RecordingRunner {
        seen: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        async fn run(&self, artifact: &Path, invocation: &mut Invocation<'_>, args: &[String]) {
            self.seen
                .lock()
                .unwrap()
                .push((artifact.to_path_buf(), args.to_vec()));
            invocation.log("recorded");
        }
    }

    /// Always fails with a cause containing quotes.
    struct FailingRunner;

    #[async_trait]
    impl Runner for FailingRunner {
        async fn run(&self, _: &Path, invocation: &mut Invocation<'_>, _: &[String]) {
            invocation.fail("failed run", &r#"exec: "missing": not found"#).await;
        }
    }

    fn registry() -> BackendRegistry {
        BackendRegistry::new()
            .register_builder("go", NoopBuilder)
            .register_runner("py", InterpreterRunner::new("python3"))
    }

    fn unit(file: &str, build_tool: Option<&str>, run_tool: Option<&str>) -> UnitConfig {
        UnitConfig {
            file: PathBuf::from(file),
            build: build_tool.map(|tool| BuildOptions {
                tool: tool.to_string(),
                flags: Vec::new(),
            }),
            run: run_tool.map(|tool| RunOptions {
                tool: tool.to_string(),
                args: vec!["--fast".to_string()],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_interpreted_unit_runs_copied_source() {
        let command = resolve(
            UnitKind::Handler,
            Path::new("bin/handlers"),
            "echo",
            &unit("src/echo.py", None, None),
            &registry(),
        )
        .unwrap();

        assert_eq!(command.artifact(), Path::new("bin/handlers/echo/echo.py"));
        assert_eq!(command.name(), "echo");
        assert_eq!(command.kind(), UnitKind::Handler);
        assert!(command.args().is_empty());
    }

    #[test]
    fn test_compiled_unit_falls_back_to_executable() {
        let command = resolve(
            UnitKind::Handler,
            Path::new("bin/handlers"),
            "adder",
            &unit("adder.go", None, None),
            &registry(),
        )
        .unwrap();

        assert_eq!(command.artifact(), Path::new("bin/handlers/adder/executable"));
    }

    #[test]
    fn test_build_tool_marks_unit_as_built() {
        let command = resolve(
            UnitKind::Task,
            Path::new("bin/tasks"),
            "native",
            &unit("native.zig", Some("zig"), None),
            &registry(),
        )
        .unwrap();

        assert_eq!(command.artifact(), Path::new("bin/tasks/native/executable"));
    }

    #[test]
    fn test_run_tool_keeps_run_args() {
        let command = resolve(
            UnitKind::Task,
            Path::new("bin/tasks"),
            "report",
            &unit("report.rb", None, Some("ruby")),
            &registry(),
        )
        .unwrap();

        assert_eq!(command.artifact(), Path::new("bin/tasks/report/report.rb"));
        assert_eq!(command.args(), ["--fast".to_string()]);
    }

    #[test]
    fn test_names_outside_the_root_do_not_resolve() {
        for name in ["../escaped", "", "/abs"] {
            let err = resolve(
                UnitKind::Handler,
                Path::new("bin/handlers"),
                name,
                &unit("echo.py", None, None),
                &registry(),
            )
            .unwrap_err();

            assert!(matches!(err, ResolveError::InvalidName { .. }), "{name:?}");
        }
    }

    #[test]
    fn test_unknown_exactly_when_nothing_applies() {
        let registry = registry();
        let root = Path::new("bin/handlers");

        // (file, build tool, run tool, expected to resolve)
        let cases = [
            ("notes.txt", None, None, false),
            ("notes.txt", Some(""), Some(""), false),
            ("notes.txt", Some("tool"), None, true),
            ("notes.txt", None, Some("tool"), true),
            ("notes.txt", Some("tool"), Some("tool"), true),
            ("echo.py", None, None, true),
            ("echo.py", Some("tool"), None, true),
            ("adder.go", None, None, true),
            ("adder.go", None, Some("tool"), true),
        ];

        for (file, build_tool, run_tool, ok) in cases {
            let result = resolve(
                UnitKind::Handler,
                root,
                "unit",
                &unit(file, build_tool, run_tool),
                &registry,
            );
            assert_eq!(result.is_ok(), ok, "{file} build={build_tool:?} run={run_tool:?}");
        }

        let err = resolve(
            UnitKind::Handler,
            root,
            "notes",
            &unit("notes.txt", None, None),
            &registry,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ResolveError::RunCommandUnknown {
                name: "notes".to_string(),
                kind: UnitKind::Handler
            }
        );
        assert!(err.to_string().contains("run command is unknown"));
    }

    #[tokio::test]
    async fn test_run_tool_overrides_extension_runner() {
        let recording = Arc::new(RecordingRunner::default());
        let registry = BackendRegistry::new()
            .register_runner("py", FailingRunner)
            .register_tool_runner("pypy", ArcRunner(recording.clone()));

        let command = resolve(
            UnitKind::Handler,
            Path::new("bin/handlers"),
            "echo",
            &unit("echo.py", None, Some("pypy")),
            &registry,
        )
        .unwrap();

        let mut output = Vec::new();
        command.invoke(&mut output, &mut tokio::io::empty()).await;

        assert!(output.is_empty());
        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen[0].0, PathBuf::from("bin/handlers/echo/echo.py"));
        assert_eq!(seen[0].1, ["--fast".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_envelope_is_written_to_output() {
        let command = RunCommand::new(
            "adder",
            UnitKind::Handler,
            PathBuf::from("bin/handlers/adder/executable"),
            Vec::new(),
            Arc::new(FailingRunner),
        );

        let mut output = Vec::new();
        command.invoke(&mut output, &mut tokio::io::empty()).await;

        let text = String::from_utf8(output).unwrap();
        assert!(text.ends_with('\n'));
        let envelope: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(
            envelope["error"],
            r#"[adder Handler] [Error] failed run: exec: "missing": not found"#
        );
        assert!(text.contains(r#"\"missing\""#));
    }

    /// Adapter so a test can keep a handle on a registered runner.
    struct ArcRunner(Arc<RecordingRunner>);

    #[async_trait]
    impl Runner for ArcRunner {
        async fn run(&self, artifact: &Path, invocation: &mut Invocation<'_>, args: &[String]) {
            self.0.run(artifact, invocation, args).await;
        }
    }
}
