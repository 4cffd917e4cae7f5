// Core modules
pub mod config;
pub mod logging;
pub mod backends;
pub mod build;
pub mod run;

// Triggers and collaborators
pub mod core;
pub mod storage;
pub mod api;
pub mod server;

// Re-export key types and functions
pub use backends::{BackendRegistry, Builder, Invocation, InvocationEvents, Runner};
pub use build::{BuildOutcome, BuildReport, build};
pub use config::{Config, UnitConfig, UnitKind, resolve_config_path};
pub use run::{ResolveError, RunCommand, resolve};
pub use server::{Dispatcher, start};
pub use storage::{Storage, SurrealStorage};
