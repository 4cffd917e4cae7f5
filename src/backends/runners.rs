// Process-backed runners

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::process::pipe_process;
use super::{Invocation, Runner};

/// Runs the artifact itself: `<artifact> <args...>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutableRunner;

#[async_trait]
impl Runner for ExecutableRunner {
    async fn run(&self, artifact: &Path, invocation: &mut Invocation<'_>, args: &[String]) {
        let mut command = Command::new(artifact);
        command.args(args);
        pipe_process(command, invocation).await;
    }
}

/// Hands the artifact to an interpreter: `<program> <artifact> <args...>`.
///
/// Used for scripting languages and for units naming a `run.tool`.
#[derive(Debug, Clone)]
pub struct InterpreterRunner {
    program: String,
}

impl InterpreterRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Runner for InterpreterRunner {
    async fn run(&self, artifact: &Path, invocation: &mut Invocation<'_>, args: &[String]) {
        let mut command = Command::new(&self.program);
        command.arg(artifact).args(args);
        pipe_process(command, invocation).await;
    }
}
