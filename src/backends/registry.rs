//! Backend registry.
//!
//! Maps source extensions (without the leading dot) and explicit tool names
//! to builders and runners. Built once at startup and shared by reference
//! with the build passes and the run command resolver.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{Builder, CompilerBuilder, ExecutableRunner, InterpreterRunner, Runner};

/// Registry of build/run backends.
#[derive(Clone)]
pub struct BackendRegistry {
    builders: HashMap<String, Arc<dyn Builder>>,
    runners: HashMap<String, Arc<dyn Runner>>,
    tool_builders: HashMap<String, Arc<dyn Builder>>,
    tool_runners: HashMap<String, Arc<dyn Runner>>,
    executable: Arc<dyn Runner>,
}

impl BackendRegistry {
    /// Create a registry with no extension or tool registrations.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
            runners: HashMap::new(),
            tool_builders: HashMap::new(),
            tool_runners: HashMap::new(),
            executable: Arc::new(ExecutableRunner),
        }
    }

    /// Create a registry with the stock language backends.
    ///
    /// Compiled languages (`go`, `c`, `cpp`, `rs`) build an executable that
    /// is run directly; scripting languages (`py`, `lua`, `sh`) are copied
    /// and handed to their interpreter.
    pub fn with_defaults() -> Self {
        let executable: Arc<dyn Runner> = Arc::new(ExecutableRunner);

        Self::new()
            .register_builder("go", CompilerBuilder::new("go").with_subcommand(["build"]))
            .register_builder("c", CompilerBuilder::new("cc"))
            .register_builder("cpp", CompilerBuilder::new("c++"))
            .register_builder("rs", CompilerBuilder::new("rustc"))
            .register_runner_arc("go", executable.clone())
            .register_runner_arc("c", executable.clone())
            .register_runner_arc("cpp", executable.clone())
            .register_runner_arc("rs", executable)
            .register_runner("py", InterpreterRunner::new("python3"))
            .register_runner("lua", InterpreterRunner::new("lua"))
            .register_runner("sh", InterpreterRunner::new("sh"))
    }

    /// Register a builder for a source extension.
    pub fn register_builder<T: Builder + 'static>(mut self, extension: &str, builder: T) -> Self {
        self.builders.insert(normalize(extension), Arc::new(builder));
        self
    }

    /// Register a runner for a source extension.
    pub fn register_runner<T: Runner + 'static>(self, extension: &str, runner: T) -> Self {
        self.register_runner_arc(extension, Arc::new(runner))
    }

    /// Register a shared runner for a source extension.
    pub fn register_runner_arc(mut self, extension: &str, runner: Arc<dyn Runner>) -> Self {
        self.runners.insert(normalize(extension), runner);
        self
    }

    /// Register a builder under an explicit tool name, overriding the generic
    /// compiler-style tool builder for that name.
    pub fn register_tool_builder<T: Builder + 'static>(mut self, tool: &str, builder: T) -> Self {
        self.tool_builders.insert(tool.to_string(), Arc::new(builder));
        self
    }

    /// Register a runner under an explicit tool name, overriding the generic
    /// interpreter-style tool runner for that name.
    pub fn register_tool_runner<T: Runner + 'static>(mut self, tool: &str, runner: T) -> Self {
        self.tool_runners.insert(tool.to_string(), Arc::new(runner));
        self
    }

    /// Builder registered for the extension of `source`.
    pub fn builder_for(&self, source: &Path) -> Option<Arc<dyn Builder>> {
        self.builders.get(extension_of(source)?).cloned()
    }

    /// Runner registered for the extension of `source`.
    pub fn runner_for(&self, source: &Path) -> Option<Arc<dyn Runner>> {
        self.runners.get(extension_of(source)?).cloned()
    }

    /// Check if `source` would be compiled by an extension builder.
    pub fn has_builder(&self, source: &Path) -> bool {
        extension_of(source).is_some_and(|ext| self.builders.contains_key(ext))
    }

    /// Builder bound to an explicit tool name, regardless of extension.
    pub fn tool_builder(&self, tool: &str) -> Arc<dyn Builder> {
        self.tool_builders
            .get(tool)
            .cloned()
            .unwrap_or_else(|| Arc::new(CompilerBuilder::new(tool)))
    }

    /// Runner bound to an explicit tool name, regardless of extension.
    pub fn tool_runner(&self, tool: &str) -> Arc<dyn Runner> {
        self.tool_runners
            .get(tool)
            .cloned()
            .unwrap_or_else(|| Arc::new(InterpreterRunner::new(tool)))
    }

    /// Runner that executes an artifact directly.
    pub fn executable_runner(&self) -> Arc<dyn Runner> {
        self.executable.clone()
    }

    /// List the extensions with a registered builder.
    pub fn build_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.builders.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// List the extensions with a registered runner.
    pub fn run_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.runners.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn normalize(extension: &str) -> String {
    extension.trim_start_matches('.').to_string()
}

fn extension_of(source: &Path) -> Option<&str> {
    source.extension().and_then(|ext| ext.to_str())
}
