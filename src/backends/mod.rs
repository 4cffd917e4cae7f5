//! Build and run backends.
//!
//! A backend is the pair of operations that turns a unit's source into an
//! artifact (`Builder`) and executes that artifact for one trigger
//! (`Runner`). Backends are looked up through a [`BackendRegistry`], either
//! by source extension or by an explicit tool name.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

mod builders;
mod process;
mod registry;
mod runners;

pub use builders::{BuildError, CompilerBuilder};
pub use process::ProcessError;
pub use registry::BackendRegistry;
pub use runners::{ExecutableRunner, InterpreterRunner};

/// Produces exactly one artifact file from a source file.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, source: &Path, output: &Path, flags: &[String]) -> Result<(), BuildError>;
}

/// Executes an artifact for a single invocation.
///
/// Runners do not return a result. Success is the output written to the
/// invocation's sink; failure goes through [`Invocation::fail`] exactly once;
/// progress goes through [`Invocation::log`] any number of times.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, artifact: &Path, invocation: &mut Invocation<'_>, args: &[String]);
}

/// Receiver for the two reporting channels of an invocation.
pub trait InvocationEvents: Send + Sync {
    /// Records a terminal failure and returns the payload to deliver to the
    /// trigger in place of normal output.
    fn error(&self, message: &str, cause: &str) -> String;

    /// Records free-text progress. Has no effect on output.
    fn log(&self, message: &str);
}

pub type OutputSink<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);
pub type InputSource<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// The streams and reporting channels of one triggered invocation.
pub struct Invocation<'a> {
    output: OutputSink<'a>,
    input: InputSource<'a>,
    events: &'a dyn InvocationEvents,
}

impl<'a> Invocation<'a> {
    pub fn new(output: OutputSink<'a>, input: InputSource<'a>, events: &'a dyn InvocationEvents) -> Self {
        Self {
            output,
            input,
            events,
        }
    }

    /// Borrows the output sink, the input source and the event channel at once.
    pub fn parts(
        &mut self,
    ) -> (
        &mut (dyn AsyncWrite + Send + Unpin + 'a),
        &mut (dyn AsyncRead + Send + Unpin + 'a),
        &'a dyn InvocationEvents,
    ) {
        (&mut *self.output, &mut *self.input, self.events)
    }

    /// Reports a terminal failure and writes the resulting envelope, newline
    /// terminated, into the output sink.
    pub async fn fail(&mut self, message: &str, cause: &(dyn fmt::Display + Sync)) {
        let envelope = self.events.error(message, &cause.to_string());
        if let Err(err) = self.write_envelope(&envelope).await {
            self.events.log(&format!("failed to deliver error payload: {err}"));
        }
    }

    pub fn log(&self, message: &str) {
        self.events.log(message);
    }

    async fn write_envelope(&mut self, envelope: &str) -> std::io::Result<()> {
        self.output.write_all(envelope.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingEvents;
    use super::*;

    #[tokio::test]
    async fn test_fail_writes_envelope_to_output() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let mut input = tokio::io::empty();

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        invocation.fail("run failed", &"boom").await;
        invocation.log("still here");

        assert_eq!(String::from_utf8(output).unwrap(), "ERR run failed: boom\n");
        assert_eq!(events.errors.lock().unwrap().len(), 1);
        assert_eq!(events.logs.lock().unwrap().as_slice(), ["still here".to_string()]);
    }
}
