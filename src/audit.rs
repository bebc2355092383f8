//! Main audit orchestration logic

use crate::advisory::SecurityAdvisory;
use crate::config::Configuration;
use crate::error::Result;
use crate::ignore::IgnoreList;
use crate::sources::{AdvisorySource, SourceRegistry};
use crate::types::{Dependency, Finding, IgnoreStatus};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Check every dependency against every source
///
/// Findings are ordered by source, then dependency, then advisory. The same
/// advisory reported by two sources yields two findings.
pub fn audit(
    sources: &mut [Box<dyn AdvisorySource>],
    dependencies: &[Dependency],
    ignore: &IgnoreList,
) -> Result<Vec<Finding>> {
    audit_with_progress(sources, dependencies, ignore, |_, _| {})
}

/// Like [`audit`], calling `progress(source, dependency)` before each check
pub fn audit_with_progress<P>(
    sources: &mut [Box<dyn AdvisorySource>],
    dependencies: &[Dependency],
    ignore: &IgnoreList,
    mut progress: P,
) -> Result<Vec<Finding>>
where
    P: FnMut(&str, &Dependency),
{
    info!(
        "Checking {} dependencies against {} source(s)",
        dependencies.len(),
        sources.len()
    );

    let mut findings = Vec::new();

    for source in sources.iter_mut() {
        let source_name = source.name().to_string();

        for dependency in dependencies {
            progress(&source_name, dependency);

            if !source.has_security_advisory_for(dependency)? {
                continue;
            }

            let (vulnerable, advisories) = source.is_vulnerable_package(dependency)?;
            if !vulnerable {
                continue;
            }

            debug!(
                "{}=={} has {} advisories in {}",
                dependency.name(),
                dependency.version(),
                advisories.len(),
                source_name
            );

            for advisory in &advisories {
                findings.push(to_finding(&source_name, dependency, advisory, ignore));
            }
        }
    }

    info!("Audit produced {} finding(s)", findings.len());
    Ok(findings)
}

/// Build the configured sources from `registry` and run [`audit`]
pub fn audit_with_configuration(
    configuration: &Configuration,
    registry: &SourceRegistry,
    dependencies: &[Dependency],
    ignore: &IgnoreList,
) -> Result<Vec<Finding>> {
    configuration.validate(registry)?;
    let mut sources = registry.create_all(&configuration.sources, &configuration.source_settings())?;
    audit(&mut sources, dependencies, ignore)
}

fn to_finding(source: &str, dependency: &Dependency, advisory: &SecurityAdvisory, ignore: &IgnoreList) -> Finding {
    let (ignored, entry) = ignore.should_ignore(advisory.identifier(), advisory.package_name());

    Finding {
        identifier: advisory.identifier().to_string(),
        severity: advisory.severity(),
        name: dependency.name().to_string(),
        version: dependency.version().to_string(),
        versions: advisory.vulnerable_versions(),
        source: source.to_string(),
        summary: advisory.summary().to_string(),
        references: advisory.references().to_vec(),
        url: advisory.url().to_string(),
        ignored: IgnoreStatus {
            ignored,
            expires: entry.as_ref().map(|e| e.expires_string()),
            reason: entry.map(|e| e.reason),
        },
        file: dependency.source().cloned(),
    }
}

/// Totals of an audit run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    /// Names of packages with at least one finding that is not ignored
    pub vulnerable_packages: BTreeSet<String>,
    /// Identifiers of ignored findings
    pub ignored_findings: Vec<String>,
}

impl AuditSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            if finding.ignored.ignored {
                summary.ignored_findings.push(finding.identifier.clone());
            } else {
                summary.vulnerable_packages.insert(finding.name.clone());
            }
        }
        summary
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.vulnerable_packages.is_empty()
    }
}
