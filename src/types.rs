//! Core data types for dependencies and audit findings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A pinned dependency read from a lock or requirements file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    name: String,
    canonical_name: String,
    version: String,
    source: Option<DependencyLocation>,
}

/// Where a dependency was declared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLocation {
    pub path: PathBuf,
    #[serde(rename = "lineno")]
    pub line: Option<usize>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            canonical_name: canonicalize_name(&name),
            name,
            version: version.into().trim().to_string(),
            source: None,
        }
    }

    /// Attach the file and line the dependency was read from
    pub fn with_source(mut self, path: impl Into<PathBuf>, line: Option<usize>) -> Self {
        self.source = Some(DependencyLocation {
            path: path.into(),
            line,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source(&self) -> Option<&DependencyLocation> {
        self.source.as_ref()
    }
}

/// Normalize a package name: lower-case, runs of `-`, `_` and `.` become one `-`
pub fn canonicalize_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                canonical.push('-');
            }
            in_separator = true;
        } else {
            canonical.extend(c.to_lowercase());
            in_separator = false;
        }
    }

    canonical
}

/// Severity level reported by an advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    /// GitHub's name for medium
    Moderate,
    High,
    Critical,
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Parse a feed-provided severity label; unrecognized labels become `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "NONE" => Self::None,
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "MODERATE" => Self::Moderate,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Ignore status attached to every finding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreStatus {
    pub ignored: bool,
    pub expires: Option<String>,
    pub reason: Option<String>,
}

/// One (dependency, advisory) match produced by an audit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub identifier: String,
    pub severity: Severity,
    /// Dependency name as declared
    pub name: String,
    /// Pinned dependency version
    pub version: String,
    /// Affected version ranges of the advisory
    pub versions: String,
    /// Name of the advisory source
    pub source: String,
    pub summary: String,
    pub references: Vec<String>,
    pub url: String,
    pub ignored: IgnoreStatus,
    #[serde(rename = "__file__", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<DependencyLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_name() {
        assert_eq!(canonicalize_name("Django"), "django");
        assert_eq!(canonicalize_name("package_name"), "package-name");
        assert_eq!(canonicalize_name("zope.interface"), "zope-interface");
        assert_eq!(canonicalize_name("Foo__-.Bar"), "foo-bar");
        assert_eq!(canonicalize_name(" urllib3 "), "urllib3");
    }

    #[test]
    fn test_dependency_keeps_declared_name() {
        let dep = Dependency::new("Flask_SQLAlchemy", "2.4.0 ").with_source("requirements.txt", Some(3));
        assert_eq!(dep.name(), "Flask_SQLAlchemy");
        assert_eq!(dep.canonical_name(), "flask-sqlalchemy");
        assert_eq!(dep.version(), "2.4.0");
        assert_eq!(dep.source().and_then(|s| s.line), Some(3));
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("moderate"), Severity::Moderate);
        assert_eq!(Severity::from_label("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_label("whatever"), Severity::Unknown);
        assert_eq!(Severity::High.to_string(), "HIGH");
    }

    #[test]
    fn test_finding_serializes_location_as_file() {
        let finding = Finding {
            identifier: "CVE-2019-11324".to_string(),
            severity: Severity::High,
            name: "urllib3".to_string(),
            version: "1.23".to_string(),
            versions: "<1.24.2".to_string(),
            source: "gemnasium".to_string(),
            summary: "Certificate verification".to_string(),
            references: vec![],
            url: "https://nvd.nist.gov/vuln/detail/CVE-2019-11324".to_string(),
            ignored: IgnoreStatus::default(),
            file: Some(DependencyLocation {
                path: PathBuf::from("requirements.txt"),
                line: Some(1),
            }),
        };

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["__file__"]["lineno"], 1);
        assert_eq!(json["ignored"]["ignored"], false);
        assert!(json["ignored"]["expires"].is_null());
    }
}
