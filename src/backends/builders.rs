// Compiler-style builders

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::Builder;

/// Errors produced while building a single unit.
#[derive(Debug)]
pub enum BuildError {
    /// The compiler could not be started.
    Spawn { program: String, source: io::Error },
    /// The compiler ran and reported failure.
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    /// The compiler succeeded without producing the artifact.
    MissingArtifact(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to start `{}`: {}", program, source),
            Self::Failed {
                program,
                status,
                stderr,
            } => write!(f, "`{}` {}: {}", program, status, stderr.trim()),
            Self::MissingArtifact(path) => write!(f, "no artifact produced at {}", path),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Builds by invoking a compiler as
/// `<program> <subcommand...> <flags...> -o <output> <source>`.
///
/// This covers `go build`, `cc`, `c++`, `rustc` and any tool named in a
/// unit's `build.tool`.
#[derive(Debug, Clone)]
pub struct CompilerBuilder {
    program: String,
    subcommand: Vec<String>,
}

impl CompilerBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            subcommand: Vec::new(),
        }
    }

    pub fn with_subcommand<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subcommand = args.into_iter().map(Into::into).collect();
        self
    }

    fn arguments(&self, source: &Path, output: &Path, flags: &[String]) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.subcommand.iter().map(OsString::from).collect();
        args.extend(flags.iter().map(OsString::from));
        args.push("-o".into());
        args.push(output.as_os_str().to_owned());
        args.push(source.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Builder for CompilerBuilder {
    async fn build(&self, source: &Path, output: &Path, flags: &[String]) -> Result<(), BuildError> {
        let args = self.arguments(source, output, flags);
        debug!(program = %self.program, ?args, "running compiler");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(BuildError::Failed {
                program: self.program.clone(),
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(BuildError::MissingArtifact(output.display().to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A "compiler" that copies its source to the `-o` target.
    fn copying_compiler() -> CompilerBuilder {
        // Without flags the script sees `-o <output> <source>` as $1..$3.
        CompilerBuilder::new("sh").with_subcommand(["-c", r#"cp "$3" "$2""#, "fake-cc"])
    }

    #[test]
    fn test_argument_layout() {
        let builder = CompilerBuilder::new("go").with_subcommand(["build"]);
        let args = builder.arguments(
            Path::new("adder.go"),
            Path::new("bin/handlers/adder/executable"),
            &["-trimpath".to_string()],
        );

        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["build", "-trimpath", "-o", "bin/handlers/adder/executable", "adder.go"]
        );
    }

    #[tokio::test]
    async fn test_successful_build_produces_artifact() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("unit.src");
        let output = dir.path().join("executable");
        std::fs::write(&source, b"payload").unwrap();

        copying_compiler().build(&source, &output, &[]).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_failed_build_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let builder = CompilerBuilder::new("sh").with_subcommand(["-c", "echo 'syntax error' >&2; exit 2"]);

        let err = builder
            .build(&dir.path().join("x.c"), &dir.path().join("executable"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Failed { .. }));
        assert!(err.to_string().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_missing_compiler() {
        let dir = TempDir::new().unwrap();
        let err = CompilerBuilder::new("unit-server-test-no-such-compiler")
            .build(&dir.path().join("x.c"), &dir.path().join("executable"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_success_without_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let builder = CompilerBuilder::new("sh").with_subcommand(["-c", "true"]);

        let err = builder
            .build(&dir.path().join("x.c"), &dir.path().join("executable"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::MissingArtifact(_)));
    }
}
