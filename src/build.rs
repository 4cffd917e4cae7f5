//! Build orchestration.
//!
//! `build` recreates the artifact tree for every configured unit. Handlers
//! and tasks are two independent passes; each pass wipes its root first, so
//! no stale artifact survives a rebuild. A unit that fails to build is
//! logged and skipped, only directory-level failures abort a pass.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::backends::BackendRegistry;
use crate::config::{Config, UnitConfig, UnitKind, is_unit_name};

/// File name of a compiled artifact inside its unit directory.
pub const EXECUTABLE_NAME: &str = "executable";

/// How a single unit ended up in the artifact tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Compiled into `executable`. Carries the artifact's SHA-256.
    Compiled { digest: String },
    /// Copied verbatim. Carries the artifact's SHA-256.
    Copied { digest: String },
    /// No artifact was produced.
    Failed { error: String },
}

impl BuildOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, BuildOutcome::Failed { .. })
    }
}

/// Outcome of one pass, by unit name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub units: BTreeMap<String, BuildOutcome>,
}

impl PassReport {
    pub fn failed(&self) -> usize {
        self.units.values().filter(|o| o.is_failed()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub handlers: PassReport,
    pub tasks: PassReport,
}

/// Rebuild the artifacts of every handler and task.
pub async fn build(config: &Config, registry: &BackendRegistry) -> Result<BuildReport> {
    info!("Building project");

    let handlers = build_units(
        UnitKind::Handler,
        &config.units_root(UnitKind::Handler),
        &config.handlers,
        registry,
    )
    .await?;

    let tasks = build_units(
        UnitKind::Task,
        &config.units_root(UnitKind::Task),
        &config.tasks,
        registry,
    )
    .await?;

    Ok(BuildReport { handlers, tasks })
}

/// Rebuild one collection of units under `units_root`.
///
/// Returns an error only when `units_root` or a unit directory cannot be
/// recreated.
pub async fn build_units(
    kind: UnitKind,
    units_root: &Path,
    units: &BTreeMap<String, UnitConfig>,
    registry: &BackendRegistry,
) -> Result<PassReport> {
    reset_dir(units_root)
        .await
        .with_context(|| format!("[{}] failed to reset artifact directory {}", kind, units_root.display()))?;

    let mut report = PassReport::default();

    for (name, unit) in units {
        if !is_unit_name(name) {
            let outcome = failed(kind, name, "invalid unit name", &"must be a single path component");
            report.units.insert(name.clone(), outcome);
            continue;
        }

        info!(unit = %name, %kind, "build unit");

        let unit_dir = units_root.join(name);
        tokio::fs::create_dir_all(&unit_dir)
            .await
            .with_context(|| format!("[{}] failed to create unit directory {}", kind, unit_dir.display()))?;

        let outcome = build_unit(kind, name, unit, &unit_dir, registry).await;
        report.units.insert(name.clone(), outcome);
    }

    info!(
        %kind,
        units = report.units.len(),
        failed = report.failed(),
        "build pass finished"
    );

    Ok(report)
}

/// Produce one unit's artifact inside `unit_dir`.
///
/// Priority: explicit `build.tool`, then the extension builder, then a
/// verbatim copy of the source.
async fn build_unit(
    kind: UnitKind,
    name: &str,
    unit: &UnitConfig,
    unit_dir: &Path,
    registry: &BackendRegistry,
) -> BuildOutcome {
    let executable = unit_dir.join(EXECUTABLE_NAME);

    let builder = match unit.build_tool() {
        Some(tool) => {
            info!(unit = %name, %kind, tool, "unit has build options, building with tool");
            Some(registry.tool_builder(tool))
        }
        None => registry.builder_for(&unit.file),
    };

    if let Some(builder) = builder {
        return match builder.build(&unit.file, &executable, unit.build_flags()).await {
            Ok(()) => match digest_file(&executable).await {
                Ok(digest) => {
                    debug!(unit = %name, %kind, %digest, "compiled");
                    BuildOutcome::Compiled { digest }
                }
                Err(err) => failed(kind, name, "failed to read artifact", &err),
            },
            Err(err) => failed(kind, name, "failed to compile", &err),
        };
    }

    let copy = unit_dir.join(unit.basename());
    match copy_artifact(&unit.file, &copy).await {
        Ok(digest) => {
            debug!(unit = %name, %kind, %digest, "copied");
            BuildOutcome::Copied { digest }
        }
        Err(err) => failed(kind, name, "failed to copy", &err),
    }
}

fn failed(kind: UnitKind, name: &str, message: &str, err: &dyn std::fmt::Display) -> BuildOutcome {
    error!(unit = %name, %kind, "{} \"{}\": {}", message, name, err);
    BuildOutcome::Failed {
        error: format!("{}: {}", message, err),
    }
}

/// Remove `dir` recursively, if present, and create it again.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    tokio::fs::create_dir_all(dir).await
}

async fn copy_artifact(source: &Path, target: &Path) -> std::io::Result<String> {
    tokio::fs::copy(source, target).await?;
    digest_file(target).await
}

async fn digest_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
