//! OSV documents and the osv.dev query source

use super::{build_client, check_status, select_affected, AdvisorySource, LookupPolicy};
use crate::advisory::SecurityAdvisory;
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::types::{Dependency, Severity};
use crate::version::{RangeEvent, VulnerableRangeSet};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

pub const NAME: &str = "osv";

const QUERY_URL: &str = "https://api.osv.dev/v1/query";
const ECOSYSTEM: &str = "PyPI";

/// An OSV vulnerability document
#[derive(Debug, Clone, Deserialize)]
pub struct OsvDocument {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub withdrawn: Option<String>,
    #[serde(default)]
    pub references: Vec<OsvReference>,
    #[serde(default)]
    pub affected: Vec<OsvAffected>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvReference {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvAffected {
    pub package: OsvPackage,
    #[serde(default)]
    pub ranges: Vec<OsvRange>,
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvPackage {
    pub name: String,
    #[serde(default)]
    pub ecosystem: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsvRange {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub events: Vec<OsvEvent>,
}

/// One range event; exactly one field is expected to be set
///
/// Versions stay text: unquoted YAML scalars such as `1.10` must not pass
/// through a float.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsvEvent {
    #[serde(default)]
    pub introduced: Option<String>,
    #[serde(default)]
    pub fixed: Option<String>,
    #[serde(default)]
    pub last_affected: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl OsvEvent {
    fn to_range_event(&self) -> Option<RangeEvent> {
        if let Some(v) = &self.introduced {
            return Some(RangeEvent::Introduced(v.clone()));
        }
        if let Some(v) = &self.fixed {
            return Some(RangeEvent::Fixed(v.clone()));
        }
        if let Some(v) = &self.last_affected {
            return Some(RangeEvent::LastAffected(v.clone()));
        }
        self.limit.clone().map(RangeEvent::Limit)
    }
}

impl OsvDocument {
    /// One advisory per affected package, attributed to `source`
    pub fn to_advisories(&self, source: &str) -> Result<Vec<SecurityAdvisory>> {
        let references: Vec<String> = self.references.iter().map(|r| r.url.clone()).collect();
        let url = references
            .first()
            .cloned()
            .unwrap_or_else(|| format!("https://osv.dev/vulnerability/{}", self.id));
        let summary = self
            .details
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or(self.summary.as_deref())
            .unwrap_or_default();

        self.affected
            .iter()
            .map(|affected| {
                let range = if self.withdrawn.is_some() {
                    VulnerableRangeSet::withdrawn()
                } else {
                    affected_range(&self.id, affected)?
                };
                Ok(SecurityAdvisory::builder(self.id.clone(), source, affected.package.name.clone())
                    .severity(Severity::Unknown)
                    .summary(summary)
                    .url(url.clone())
                    .references(references.clone())
                    .range(range)
                    .build())
            })
            .collect()
    }
}

/// Union of ECOSYSTEM and SEMVER ranges, else the enumerated versions
fn affected_range(id: &str, affected: &OsvAffected) -> Result<VulnerableRangeSet> {
    let usable: Vec<&OsvRange> = affected
        .ranges
        .iter()
        .filter(|range| matches!(range.kind.as_str(), "ECOSYSTEM" | "SEMVER"))
        .collect();

    if !usable.is_empty() {
        let mut set = VulnerableRangeSet::withdrawn();
        for range in usable {
            let events: Vec<RangeEvent> = range.events.iter().filter_map(OsvEvent::to_range_event).collect();
            set.extend(VulnerableRangeSet::from_events(&events)?);
        }
        return Ok(set);
    }

    if !affected.versions.is_empty() {
        return VulnerableRangeSet::pinned(&affected.versions);
    }

    if affected.ranges.is_empty() {
        return Ok(VulnerableRangeSet::all());
    }

    debug!("{} lists only commit ranges for {}, no version can match", id, affected.package.name);
    Ok(VulnerableRangeSet::withdrawn())
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    version: &'a str,
    package: QueryPackage<'a>,
}

#[derive(Debug, Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    vulns: Vec<OsvDocument>,
}

/// Queries osv.dev once per dependency; keeps no local artifact
#[derive(Debug)]
pub struct OsvSource {
    url: String,
    network: NetworkConfig,
    client: Option<Client>,
}

impl OsvSource {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            url: QUERY_URL.to_string(),
            network,
            client: None,
        }
    }

    /// Send queries to another endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn client(&mut self) -> Result<Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = build_client(&self.network)?;
        self.client = Some(client.clone());
        Ok(client)
    }

    fn query(&mut self, dependency: &Dependency) -> Result<Vec<OsvDocument>> {
        debug!("Querying OSV for {}=={}", dependency.canonical_name(), dependency.version());
        let request = QueryRequest {
            version: dependency.version(),
            package: QueryPackage {
                name: dependency.canonical_name(),
                ecosystem: ECOSYSTEM,
            },
        };

        let response = self.client()?.post(&self.url).json(&request).send()?;
        let body: QueryResponse = check_status(NAME, response)?.json()?;
        Ok(body.vulns)
    }
}

impl AdvisorySource for OsvSource {
    fn name(&self) -> &str {
        NAME
    }

    fn lookup_policy(&self) -> LookupPolicy {
        LookupPolicy::AlwaysQuery
    }

    fn cache_path(&self) -> Option<PathBuf> {
        None
    }

    fn requires_update(&self) -> bool {
        false
    }

    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn populate_from_cache(&mut self) -> Result<()> {
        Ok(())
    }

    fn total_count(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn has_security_advisory_for(&mut self, _dependency: &Dependency) -> Result<bool> {
        Ok(true)
    }

    fn is_vulnerable_package(
        &mut self,
        dependency: &Dependency,
    ) -> Result<(bool, Vec<SecurityAdvisory>)> {
        let mut candidates = Vec::new();
        for document in self.query(dependency)? {
            candidates.extend(document.to_advisories(NAME)?);
        }
        Ok(select_affected(&candidates, dependency.version()))
    }
}
