//! Readers for pinned Python dependency files

use crate::error::{AuditError, Result};
use crate::types::Dependency;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Supported dependency file formats, named after their usual file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyFormat {
    Requirements,
    PoetryLock,
    PipfileLock,
}

impl DependencyFormat {
    pub const ALL: [DependencyFormat; 3] = [Self::Requirements, Self::PoetryLock, Self::PipfileLock];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements.txt",
            Self::PoetryLock => "poetry.lock",
            Self::PipfileLock => "Pipfile.lock",
        }
    }

    /// Format implied by a path's file name, if it is a known one
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::ALL.into_iter().find(|format| format.file_name() == name)
    }
}

impl FromStr for DependencyFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.file_name() == s.trim())
            .ok_or_else(|| AuditError::UnsupportedFormat(s.to_string()))
    }
}

impl fmt::Display for DependencyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Read dependencies from `path`
///
/// A recognized file name takes precedence over `format`; otherwise `format`
/// must be given.
pub fn extract_dependencies_from(path: &Path, format: Option<DependencyFormat>) -> Result<Vec<Dependency>> {
    let format = resolve_format(path, format)?;
    let file = File::open(path)?;
    read_dependencies(BufReader::new(file), format, path)
}

/// Format to use for `path`, preferring the one implied by its name
pub fn resolve_format(path: &Path, format: Option<DependencyFormat>) -> Result<DependencyFormat> {
    if let Some(inferred) = DependencyFormat::from_path(path) {
        debug!("Assuming '{}' from filename", inferred);
        return Ok(inferred);
    }
    format.ok_or_else(|| AuditError::UnsupportedFormat(path.display().to_string()))
}

/// Read dependencies in `format` from any reader; `origin` is recorded as their source
pub fn read_dependencies<R: BufRead>(reader: R, format: DependencyFormat, origin: &Path) -> Result<Vec<Dependency>> {
    let dependencies = match format {
        DependencyFormat::Requirements => read_requirements(reader, origin)?,
        DependencyFormat::PoetryLock => read_poetry_lock(reader, origin)?,
        DependencyFormat::PipfileLock => read_pipfile_lock(reader, origin)?,
    };
    debug!("Read {} dependencies from {}", dependencies.len(), origin.display());
    Ok(dependencies)
}

fn read_requirements<R: BufRead>(reader: R, origin: &Path) -> Result<Vec<Dependency>> {
    let mut dependencies = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("--hash") || trimmed.starts_with("-e") {
            continue;
        }

        let requirement = trimmed.split(';').next().unwrap_or_default();
        let requirement = requirement.split_whitespace().next().unwrap_or_default();
        match requirement.split_once("==") {
            Some((name, version)) if !name.is_empty() && !version.is_empty() && !version.contains("==") => {
                dependencies.push(Dependency::new(name, version).with_source(origin, Some(index + 1)));
            }
            _ => {
                warn!("Unable to extract package and version from '{}', skipping", trimmed);
            }
        }
    }

    Ok(dependencies)
}

#[derive(Debug, Deserialize)]
struct PoetryLock {
    #[serde(default)]
    package: Vec<PoetryPackage>,
}

#[derive(Debug, Deserialize)]
struct PoetryPackage {
    name: String,
    version: String,
}

fn read_poetry_lock<R: Read>(mut reader: R, origin: &Path) -> Result<Vec<Dependency>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let lock: PoetryLock = toml::from_str(&content)?;

    Ok(lock
        .package
        .into_iter()
        .map(|package| Dependency::new(package.name, package.version).with_source(origin, None))
        .collect())
}

#[derive(Debug, Deserialize)]
struct PipfileLock {
    #[serde(default)]
    develop: BTreeMap<String, PipfilePackage>,
    #[serde(default)]
    default: BTreeMap<String, PipfilePackage>,
}

#[derive(Debug, Deserialize)]
struct PipfilePackage {
    #[serde(default)]
    version: Option<String>,
}

fn read_pipfile_lock<R: Read>(reader: R, origin: &Path) -> Result<Vec<Dependency>> {
    let lock: PipfileLock = serde_json::from_reader(reader)?;
    let mut dependencies = Vec::new();

    for section in [&lock.develop, &lock.default] {
        for (name, package) in section {
            let Some(pinned) = &package.version else {
                debug!("Skipping {} without a pinned version", name);
                continue;
            };
            let version = pinned.strip_prefix("==").ok_or_else(|| {
                AuditError::InvalidDependency(format!("Unexpected value for pinned version '{}' of {}", pinned, name))
            })?;
            dependencies.push(Dependency::new(name.as_str(), version).with_source(origin, None));
        }
    }

    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn read(content: &str, format: DependencyFormat) -> Result<Vec<Dependency>> {
        read_dependencies(Cursor::new(content), format, Path::new(format.file_name()))
    }

    fn pairs(dependencies: &[Dependency]) -> Vec<(&str, &str)> {
        dependencies.iter().map(|d| (d.name(), d.version())).collect()
    }

    #[test]
    fn test_requirements_txt() {
        let content = "\
# comment
urllib3==1.23 \\
    --hash=sha256:a68ac5e15e76e7e5dd2b8f94007233e01effe3e50e8daddf69acfd81cb686baf
-e git+https://github.com/psf/requests.git#egg=requests

Django==2.2.8; python_version >= \"3.6\"
flask>=1.0
pyyaml == 5.1
";
        let dependencies = read(content, DependencyFormat::Requirements).unwrap();
        assert_eq!(pairs(&dependencies), vec![("urllib3", "1.23"), ("Django", "2.2.8")]);
        assert_eq!(dependencies[0].source().and_then(|s| s.line), Some(2));
        assert_eq!(dependencies[1].source().and_then(|s| s.line), Some(6));
        assert_eq!(dependencies[1].canonical_name(), "django");
    }

    #[test]
    fn test_poetry_lock() {
        let content = r#"
[[package]]
name = "urllib3"
version = "1.23"
category = "main"

[[package]]
name = "Jinja2"
version = "2.10"

[metadata]
content-hash = "abc"
"#;
        let dependencies = read(content, DependencyFormat::PoetryLock).unwrap();
        assert_eq!(pairs(&dependencies), vec![("urllib3", "1.23"), ("Jinja2", "2.10")]);
        assert_eq!(dependencies[0].source().map(|s| s.path.clone()), Some("poetry.lock".into()));
    }

    #[test]
    fn test_pipfile_lock_reads_develop_first() {
        let content = r#"{
            "_meta": {"hash": {"sha256": "x"}},
            "default": {"urllib3": {"version": "==1.23"}, "local": {"path": "."}},
            "develop": {"pytest": {"version": "==5.3.0"}}
        }"#;
        let dependencies = read(content, DependencyFormat::PipfileLock).unwrap();
        assert_eq!(pairs(&dependencies), vec![("pytest", "5.3.0"), ("urllib3", "1.23")]);
    }

    #[test]
    fn test_pipfile_lock_rejects_unpinned_version() {
        let content = r#"{"default": {"urllib3": {"version": ">=1.23"}}, "develop": {}}"#;
        assert!(matches!(
            read(content, DependencyFormat::PipfileLock),
            Err(AuditError::InvalidDependency(_))
        ));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("poetry.lock".parse::<DependencyFormat>().unwrap(), DependencyFormat::PoetryLock);
        assert!(matches!(
            "setup.py".parse::<DependencyFormat>(),
            Err(AuditError::UnsupportedFormat(_))
        ));
        assert_eq!(
            DependencyFormat::from_path(Path::new("/src/app/Pipfile.lock")),
            Some(DependencyFormat::PipfileLock)
        );
        assert_eq!(DependencyFormat::from_path(Path::new("reqs.txt")), None);
    }

    #[test]
    fn test_extract_infers_format_from_filename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "requests==2.19.1\n").unwrap();

        // the file name wins over the explicit format
        let dependencies = extract_dependencies_from(&path, Some(DependencyFormat::PoetryLock)).unwrap();
        assert_eq!(pairs(&dependencies), vec![("requests", "2.19.1")]);
    }

    #[test]
    fn test_extract_unknown_file_needs_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deps.txt");
        std::fs::write(&path, "requests==2.19.1\n").unwrap();

        assert!(matches!(
            extract_dependencies_from(&path, None),
            Err(AuditError::UnsupportedFormat(_))
        ));
        let dependencies = extract_dependencies_from(&path, Some(DependencyFormat::Requirements)).unwrap();
        assert_eq!(dependencies.len(), 1);
    }
}
