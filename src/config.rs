use anyhow::Context;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fmt, fs,
    path::{Component, Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "./config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory receiving `handlers/` and `tasks/` artifacts.
    pub artifacts_root: ArtifactsRoot,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub handlers: BTreeMap<String, UnitConfig>,
    pub tasks: BTreeMap<String, UnitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ArtifactsRoot(pub PathBuf);

impl Default for ArtifactsRoot {
    fn default() -> Self {
        Self(PathBuf::from("bin"))
    }
}

/// One handler or task as declared in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub file: PathBuf,
    pub build: Option<BuildOptions>,
    pub run: Option<RunOptions>,
    /// HTTP path, handlers only.
    pub path: String,
    /// Cron expression, tasks only.
    pub period: String,
    #[serde(alias = "logsenable")]
    pub logs_enable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub tool: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub tool: String,
    pub args: Vec<String>,
}

impl UnitConfig {
    /// The declared build tool, if any. An empty string counts as absent.
    pub fn build_tool(&self) -> Option<&str> {
        self.build
            .as_ref()
            .map(|b| b.tool.as_str())
            .filter(|tool| !tool.is_empty())
    }

    pub fn build_flags(&self) -> &[String] {
        self.build.as_ref().map(|b| b.flags.as_slice()).unwrap_or(&[])
    }

    /// The declared run tool, if any. An empty string counts as absent.
    pub fn run_tool(&self) -> Option<&str> {
        self.run
            .as_ref()
            .map(|r| r.tool.as_str())
            .filter(|tool| !tool.is_empty())
    }

    pub fn run_args(&self) -> &[String] {
        self.run.as_ref().map(|r| r.args.as_slice()).unwrap_or(&[])
    }

    /// Source extension without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        self.file.extension().and_then(|ext| ext.to_str())
    }

    /// Source file name, used as the artifact name when the unit is copied.
    pub fn basename(&self) -> &Path {
        self.file
            .file_name()
            .map(Path::new)
            .unwrap_or(self.file.as_path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Handler,
    Task,
}

impl UnitKind {
    /// Artifact subdirectory for this kind of unit.
    pub fn dir_name(self) -> &'static str {
        match self {
            UnitKind::Handler => "handlers",
            UnitKind::Task => "tasks",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Handler => f.write_str("Handler"),
            UnitKind::Task => f.write_str("Task"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl LogLevel {
    /// `EnvFilter` level name. `verbose` is an alias for `debug`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose | LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    /// Append logs to this file instead of stdout.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub enable: bool,
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enable: false,
            url: "memory".to_string(),
            namespace: "unit".to_string(),
            database: "server".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Check that `name` is usable as a unit directory: exactly one normal path
/// component, so its artifacts stay under `<root>/<kind>/`.
pub fn is_unit_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Picks the configuration path: the explicit argument wins, then `./config.yml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_unit(unit: &mut UnitConfig) {
    if let Some(file) = unit.file.to_str() {
        unit.file = PathBuf::from(expand_env_vars(file));
    }
    if let Some(build) = unit.build.as_mut() {
        build.tool = expand_env_vars(&build.tool);
        build.flags = build.flags.iter().map(|f| expand_env_vars(f)).collect();
    }
    if let Some(run) = unit.run.as_mut() {
        run.tool = expand_env_vars(&run.tool);
        run.args = run.args.iter().map(|a| expand_env_vars(a)).collect();
    }
}

impl Config {
    /// Parses a YAML document and expands `${VAR}` references in unit fields
    /// and database settings.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_yaml::from_str(raw)?;

        for unit in config.handlers.values_mut().chain(config.tasks.values_mut()) {
            expand_unit(unit);
        }

        let db = &mut config.database;
        db.url = expand_env_vars(&db.url);
        if db.username.is_none() {
            db.username = env::var("SURREALDB_USERNAME").ok();
        }
        if db.password.is_none() {
            db.password = env::var("SURREALDB_PASSWORD").ok();
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Artifact directory for one kind of unit, e.g. `bin/handlers`.
    pub fn units_root(&self, kind: UnitKind) -> PathBuf {
        self.artifacts_root.0.join(kind.dir_name())
    }

    pub fn units(&self, kind: UnitKind) -> &BTreeMap<String, UnitConfig> {
        match kind {
            UnitKind::Handler => &self.handlers,
            UnitKind::Task => &self.tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        let config = Config::from_yaml(
            r#"
handlers:
  echo:
    file: echo.py
    path: /echo
  adder:
    file: adder.go
    path: /add
    build:
      flags: ["-trimpath"]
tasks:
  tick:
    file: tick.sh
    period: "*/5 * * * * *"
    logsenable: true
    run:
      tool: bash
      args: ["--quiet"]
"#,
        )
        .unwrap();

        assert_eq!(config.handlers.len(), 2);
        let echo = &config.handlers["echo"];
        assert_eq!(echo.path, "/echo");
        assert_eq!(echo.extension(), Some("py"));
        assert!(echo.build_tool().is_none());
        assert!(echo.build_flags().is_empty());

        let adder = &config.handlers["adder"];
        assert_eq!(adder.build_flags(), ["-trimpath".to_string()]);
        assert!(adder.build_tool().is_none());

        let tick = &config.tasks["tick"];
        assert!(tick.logs_enable);
        assert_eq!(tick.run_tool(), Some("bash"));
        assert_eq!(tick.run_args(), ["--quiet".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("{}").unwrap();

        assert_eq!(config.units_root(UnitKind::Handler), PathBuf::from("bin/handlers"));
        assert_eq!(config.units_root(UnitKind::Task), PathBuf::from("bin/tasks"));
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(!config.database.enable);
        assert_eq!(config.database.url, "memory");
    }

    #[test]
    fn test_empty_tool_counts_as_absent() {
        let config = Config::from_yaml(
            r#"
handlers:
  blank:
    file: blank.py
    path: /blank
    build: { tool: "" }
    run: { tool: "" }
"#,
        )
        .unwrap();

        let unit = &config.handlers["blank"];
        assert!(unit.build_tool().is_none());
        assert!(unit.run_tool().is_none());
    }

    #[test]
    fn test_verbose_maps_to_debug() {
        let config = Config::from_yaml("logging: { level: verbose }").unwrap();
        assert_eq!(config.logging.level.as_filter(), "debug");
    }

    #[test]
    fn test_unknown_variable_is_left_intact() {
        assert_eq!(
            expand_env_vars("${UNIT_SERVER_SURELY_UNSET_VAR}/x"),
            "${UNIT_SERVER_SURELY_UNSET_VAR}/x"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_basename() {
        let unit = UnitConfig {
            file: PathBuf::from("units/python/echo.py"),
            ..Default::default()
        };
        assert_eq!(unit.basename(), Path::new("echo.py"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("missing.yml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_yaml(include_str!("../config.example.yml")).unwrap();

        assert_eq!(config.handlers.len(), 3);
        assert_eq!(config.handlers["report"].run_tool(), Some("cat"));
        assert_eq!(config.tasks["cleanup"].run_args(), ["--dry-run".to_string()]);
        assert!(config.tasks["tick"].logs_enable);
    }

    #[test]
    fn test_unit_names() {
        assert!(is_unit_name("echo"));
        assert!(is_unit_name("adder.v2"));
        assert!(!is_unit_name(""));
        assert!(!is_unit_name("."));
        assert!(!is_unit_name(".."));
        assert!(!is_unit_name("../escaped"));
        assert!(!is_unit_name("/abs"));
        assert!(!is_unit_name("nested/unit"));
    }
}
