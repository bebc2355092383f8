//! Configuration for audit runs
//!
//! Values come from the `[tool.skjold]` table of a `pyproject.toml`, then from
//! the environment (`SKJOLD_CACHE_DIR`, `SKJOLD_IGNORE_FILE`), then from the
//! command line.

use crate::error::{AuditError, Result};
use crate::sources::{github, SourceRegistry, SourceSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const CACHE_DIR_VARIABLE: &str = "SKJOLD_CACHE_DIR";
pub const IGNORE_FILE_VARIABLE: &str = "SKJOLD_IGNORE_FILE";

/// Default maximum cache age: 12 hours
pub const DEFAULT_CACHE_EXPIRES: u64 = 12 * 3600;
pub const DEFAULT_IGNORE_FILE: &str = ".skjoldignore";

/// How findings are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Cli,
    Json,
}

impl FromStr for ReportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cli" => Ok(Self::Cli),
            "json" => Ok(Self::Json),
            other => Err(AuditError::config(format!(
                "unknown report format '{}', expected 'cli' or 'json'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Main configuration for an audit run
#[derive(Debug, Clone, Serialize)]
pub struct Configuration {
    /// Advisory sources to query, in order
    pub sources: Vec<String>,
    /// Always exit successfully, even with findings
    pub report_only: bool,
    pub report_format: ReportFormat,
    /// Directory holding one artifact per source
    pub cache_dir: PathBuf,
    /// Maximum artifact age in seconds
    pub cache_expires: u64,
    pub ignore_file: PathBuf,
    pub verbose: bool,
    #[serde(skip)]
    pub network: NetworkConfig,
}

/// Network configuration for remote feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Token for the GitHub GraphQL API
    #[serde(skip_serializing)]
    pub github_token: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            github_token: std::env::var(github::TOKEN_VARIABLE).ok(),
        }
    }
}

impl NetworkConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[tool.skjold]` as written in pyproject.toml; every key is optional
#[derive(Debug, Default, Deserialize)]
struct FileConfiguration {
    sources: Option<Vec<String>>,
    report_only: Option<bool>,
    report_format: Option<ReportFormat>,
    cache_dir: Option<PathBuf>,
    cache_expires: Option<u64>,
    ignore_file: Option<PathBuf>,
    verbose: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PyprojectDocument {
    #[serde(default)]
    tool: Option<ToolTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    skjold: Option<FileConfiguration>,
}

/// `~/.skjold/cache`, or `.skjold_cache` without a home directory
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".skjold").join("cache"))
        .unwrap_or_else(|| PathBuf::from(".skjold_cache"))
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            report_only: false,
            report_format: ReportFormat::Cli,
            cache_dir: default_cache_dir(),
            cache_expires: DEFAULT_CACHE_EXPIRES,
            ignore_file: PathBuf::from(DEFAULT_IGNORE_FILE),
            verbose: false,
            network: NetworkConfig::default(),
        }
    }
}

impl Configuration {
    /// Create a new builder for Configuration
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Load from a pyproject.toml, then apply environment overrides
    ///
    /// A missing file leaves every value at its default.
    pub fn load(path: &Path) -> Result<Self> {
        let mut configuration = if path.is_file() {
            debug!("Reading configuration from {}", path.display());
            Self::from_pyproject_str(&fs::read_to_string(path)?)?
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
            Self::default()
        };
        configuration.apply_overrides(|name| std::env::var(name).ok());
        Ok(configuration)
    }

    /// Parse the `[tool.skjold]` table of a pyproject.toml document
    pub fn from_pyproject_str(content: &str) -> Result<Self> {
        let document: PyprojectDocument = toml::from_str(content)?;
        let file = document
            .tool
            .and_then(|tool| tool.skjold)
            .unwrap_or_default();

        let mut builder = Self::builder();
        if let Some(sources) = file.sources {
            builder = builder.sources(sources);
        }
        if let Some(report_only) = file.report_only {
            builder = builder.report_only(report_only);
        }
        if let Some(report_format) = file.report_format {
            builder = builder.report_format(report_format);
        }
        if let Some(cache_dir) = file.cache_dir {
            builder = builder.cache_dir(cache_dir);
        }
        if let Some(cache_expires) = file.cache_expires {
            builder = builder.cache_expires(cache_expires);
        }
        if let Some(ignore_file) = file.ignore_file {
            builder = builder.ignore_file(ignore_file);
        }
        if let Some(verbose) = file.verbose {
            builder = builder.verbose(verbose);
        }
        if let Some(timeout_secs) = file.timeout_secs {
            builder = builder.network(NetworkConfig {
                timeout_secs,
                ..NetworkConfig::default()
            });
        }
        Ok(builder.build())
    }

    /// Apply `SKJOLD_CACHE_DIR` and `SKJOLD_IGNORE_FILE` as resolved by `lookup`
    pub fn apply_overrides<L>(&mut self, lookup: L)
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(cache_dir) = lookup(CACHE_DIR_VARIABLE).filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(cache_dir);
        }
        if let Some(ignore_file) = lookup(IGNORE_FILE_VARIABLE).filter(|v| !v.is_empty()) {
            self.ignore_file = PathBuf::from(ignore_file);
        }
    }

    /// Reject source names the registry cannot build
    pub fn validate(&self, registry: &SourceRegistry) -> Result<()> {
        for name in &self.sources {
            if !registry.contains(name) {
                return Err(AuditError::config(format!(
                    "Source with name '{}' does not exist! Available: {}",
                    name,
                    registry.names().join(", ")
                )));
            }
        }
        Ok(())
    }

    pub fn cache_expires(&self) -> Duration {
        Duration::from_secs(self.cache_expires)
    }

    /// Settings handed to source factories
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings::new(self.cache_dir.clone(), self.cache_expires()).with_network(self.network.clone())
    }

    /// `(key, value)` pairs for display
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sources", format!("{:?}", self.sources)),
            ("report_only", self.report_only.to_string()),
            ("report_format", self.report_format.to_string()),
            ("verbose", self.verbose.to_string()),
            ("cache_dir", self.cache_dir.display().to_string()),
            ("cache_expires", self.cache_expires.to_string()),
            ("ignore_file", self.ignore_file.display().to_string()),
        ]
    }
}

/// Builder for Configuration
#[derive(Default)]
pub struct ConfigurationBuilder {
    sources: Option<Vec<String>>,
    report_only: bool,
    report_format: ReportFormat,
    cache_dir: Option<PathBuf>,
    cache_expires: Option<u64>,
    ignore_file: Option<PathBuf>,
    verbose: bool,
    network: Option<NetworkConfig>,
}

impl ConfigurationBuilder {
    pub fn sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.sources.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    pub fn report_only(mut self, report_only: bool) -> Self {
        self.report_only = report_only;
        self
    }

    pub fn report_format(mut self, format: ReportFormat) -> Self {
        self.report_format = format;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_expires(mut self, seconds: u64) -> Self {
        self.cache_expires = Some(seconds);
        self
    }

    pub fn ignore_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignore_file = Some(path.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            sources: self.sources.unwrap_or_default(),
            report_only: self.report_only,
            report_format: self.report_format,
            cache_dir: self.cache_dir.unwrap_or_else(default_cache_dir),
            cache_expires: self.cache_expires.unwrap_or(DEFAULT_CACHE_EXPIRES),
            ignore_file: self
                .ignore_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IGNORE_FILE)),
            verbose: self.verbose,
            network: self.network.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PYPROJECT: &str = r#"
[tool.poetry]
name = "example"

[tool.skjold]
sources = ["pyup", "gemnasium"]
report_only = true
report_format = "json"
cache_dir = "/tmp/skjold-cache"
cache_expires = 3600
ignore_file = "security/.skjoldignore"
"#;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert!(config.sources.is_empty());
        assert!(!config.report_only);
        assert_eq!(config.report_format, ReportFormat::Cli);
        assert_eq!(config.cache_expires, 43200);
        assert_eq!(config.ignore_file, PathBuf::from(".skjoldignore"));
        assert!(config.cache_dir.ends_with("cache"));
    }

    #[test]
    fn test_from_pyproject() {
        let config = Configuration::from_pyproject_str(PYPROJECT).unwrap();
        assert_eq!(config.sources, vec!["pyup", "gemnasium"]);
        assert!(config.report_only);
        assert_eq!(config.report_format, ReportFormat::Json);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/skjold-cache"));
        assert_eq!(config.cache_expires(), Duration::from_secs(3600));
        assert_eq!(config.ignore_file, PathBuf::from("security/.skjoldignore"));
    }

    #[test]
    fn test_pyproject_without_table_uses_defaults() {
        let config = Configuration::from_pyproject_str("[tool.black]\nline-length = 88\n").unwrap();
        assert!(config.sources.is_empty());
        assert_eq!(config.cache_expires, DEFAULT_CACHE_EXPIRES);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(matches!(
            Configuration::from_pyproject_str("[tool.skjold\nsources = 1"),
            Err(AuditError::TomlError(_))
        ));
        assert!(Configuration::from_pyproject_str("[tool.skjold]\nreport_format = \"xml\"\n").is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = Configuration::from_pyproject_str(PYPROJECT).unwrap();
        config.apply_overrides(|name| match name {
            CACHE_DIR_VARIABLE => Some("/var/cache/skjold".to_string()),
            _ => None,
        });
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/skjold"));
        assert_eq!(config.ignore_file, PathBuf::from("security/.skjoldignore"));

        config.apply_overrides(|name| match name {
            IGNORE_FILE_VARIABLE => Some("ci.skjoldignore".to_string()),
            _ => None,
        });
        assert_eq!(config.ignore_file, PathBuf::from("ci.skjoldignore"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Configuration::load(&dir.path().join("pyproject.toml")).unwrap();
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_validate_sources() {
        let registry = SourceRegistry::with_defaults();
        let config = Configuration::builder().source("pyup").source("osv").build();
        assert!(config.validate(&registry).is_ok());

        let config = Configuration::builder().sources(["pyup", "nvd"]).build();
        let err = config.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("nvd"));
    }

    #[test]
    fn test_source_settings() {
        let config = Configuration::builder().cache_dir("/tmp/c").cache_expires(60).build();
        let settings = config.source_settings();
        assert_eq!(settings.cache_dir(), Path::new("/tmp/c"));
        assert_eq!(settings.cache_expires, Duration::from_secs(60));
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!(ReportFormat::Cli.to_string(), "cli");
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
