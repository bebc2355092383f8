//! GitLab gemnasium-db advisories

use super::archive::{check_archive, read_members};
use super::cache::{AdvisoryFeed, CachedSource};
use super::check_status;
use crate::advisory::{severity_from_vectors, SecurityAdvisory};
use crate::error::{AuditError, Result};
use crate::types::canonicalize_name;
use crate::version::{RangeDialect, VulnerableRangeSet};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

pub const NAME: &str = "gemnasium";

const ARCHIVE_URL: &str =
    "https://gitlab.com/gitlab-org/security-products/gemnasium-db/-/archive/master/gemnasium-db-master.zip";

/// Range gemnasium uses to mark a withdrawn advisory
const WITHDRAWN_RANGE: &str = "(,0)";

pub type GemnasiumSource = CachedSource<GemnasiumFeed>;

/// One `pypi/<package>/<id>.yml` document
#[derive(Debug, Deserialize)]
struct GemnasiumDocument {
    identifier: String,
    package_slug: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    affected_range: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    cvss_v2: Option<String>,
    #[serde(default)]
    cvss_v3: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GemnasiumFeed {
    url: String,
}

impl GemnasiumFeed {
    pub fn new() -> Self {
        Self::with_url(ARCHIVE_URL)
    }

    /// Download the archive from another location
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for GemnasiumFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryFeed for GemnasiumFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn artifact_name(&self) -> &'static str {
        "gemnasium.cache"
    }

    fn fetch(&self, client: &Client) -> Result<Vec<u8>> {
        debug!("Downloading {}", self.url);
        let response = check_status(NAME, client.get(&self.url).send()?)?;
        Ok(response.bytes()?.to_vec())
    }

    fn validate(&self, artifact: &[u8]) -> Result<()> {
        check_archive(artifact)
    }

    fn parse(&mut self, artifact: &[u8]) -> Result<Vec<SecurityAdvisory>> {
        let members = read_members(artifact, |name| name.contains("/pypi/") && name.ends_with(".yml"))?;

        members
            .into_iter()
            .map(|(name, content)| {
                let document: GemnasiumDocument = serde_yaml::from_slice(&content)
                    .map_err(|e| AuditError::parse(format!("{}: {}", name, e)))?;
                to_advisory(document)
            })
            .collect()
    }
}

fn to_advisory(document: GemnasiumDocument) -> Result<SecurityAdvisory> {
    let package_name = document.package_slug.replace("pypi/", "").trim().to_string();
    let severity = severity_from_vectors(&[document.cvss_v3.as_deref(), document.cvss_v2.as_deref()])?;
    let range = affected_range(&document.identifier, &package_name, document.affected_range.as_deref())?;

    Ok(SecurityAdvisory::builder(document.identifier, NAME, package_name)
        .severity(severity)
        .summary(format!("{}. {}", document.title, document.description))
        .references(document.urls)
        .range(range)
        .build())
}

fn affected_range(identifier: &str, package_name: &str, expr: Option<&str>) -> Result<VulnerableRangeSet> {
    let expr = expr.unwrap_or("").trim();
    if expr == WITHDRAWN_RANGE {
        return Ok(VulnerableRangeSet::withdrawn());
    }

    // Upstream publishes the truncated bound '<2.2.' for this entry
    if identifier == "CVE-2019-14233" && canonicalize_name(package_name) == "django" {
        return VulnerableRangeSet::parse("<2.2.4", RangeDialect::Pep440);
    }

    VulnerableRangeSet::parse(expr, RangeDialect::Pep440)
}
