//! Normalized security advisory record
//!
//! Every source adapter converts its feed format into [`SecurityAdvisory`] at
//! ingestion time, so the rest of the crate never sees feed-specific data.

use crate::cvss::CvssVector;
use crate::error::Result;
use crate::types::{canonicalize_name, Severity};
use crate::version::VulnerableRangeSet;

/// A known vulnerability affecting one package and a set of version ranges
#[derive(Debug, Clone)]
pub struct SecurityAdvisory {
    identifier: String,
    source: String,
    package_name: String,
    canonical_name: String,
    severity: Severity,
    summary: String,
    url: String,
    references: Vec<String>,
    vulnerable_version_range: VulnerableRangeSet,
}

impl SecurityAdvisory {
    pub fn builder(
        identifier: impl Into<String>,
        source: impl Into<String>,
        package_name: impl Into<String>,
    ) -> SecurityAdvisoryBuilder {
        SecurityAdvisoryBuilder::new(identifier.into(), source.into(), package_name.into())
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn vulnerable_version_range(&self) -> &VulnerableRangeSet {
        &self.vulnerable_version_range
    }

    /// Affected ranges rendered as text
    pub fn vulnerable_versions(&self) -> String {
        self.vulnerable_version_range.to_string()
    }

    /// Whether `version` falls inside any affected range
    pub fn is_affected(&self, version: &str) -> bool {
        self.vulnerable_version_range.contains(version)
    }
}

/// Builder for SecurityAdvisory
pub struct SecurityAdvisoryBuilder {
    identifier: String,
    source: String,
    package_name: String,
    severity: Severity,
    summary: String,
    url: Option<String>,
    references: Vec<String>,
    range: VulnerableRangeSet,
}

impl SecurityAdvisoryBuilder {
    fn new(identifier: String, source: String, package_name: String) -> Self {
        Self {
            identifier,
            source,
            package_name: package_name.trim().to_string(),
            severity: Severity::Unknown,
            summary: String::new(),
            url: None,
            references: Vec::new(),
            range: VulnerableRangeSet::all(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Link to details; defaults to the first reference
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn range(mut self, range: VulnerableRangeSet) -> Self {
        self.range = range;
        self
    }

    pub fn build(self) -> SecurityAdvisory {
        let url = self
            .url
            .or_else(|| self.references.first().cloned())
            .unwrap_or_default();

        SecurityAdvisory {
            canonical_name: canonicalize_name(&self.package_name),
            identifier: self.identifier,
            source: self.source,
            package_name: self.package_name,
            severity: self.severity,
            summary: self.summary,
            url,
            references: self.references,
            vulnerable_version_range: self.range,
        }
    }
}

/// Severity of the first present vector, `Unknown` when none is present
pub fn severity_from_vectors(vectors: &[Option<&str>]) -> Result<Severity> {
    for vector in vectors.iter().flatten() {
        if vector.trim().is_empty() {
            continue;
        }
        return Ok(CvssVector::parse(vector)?.severity());
    }
    Ok(Severity::Unknown)
}
