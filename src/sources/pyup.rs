//! pyup.io safety-db snapshot
//!
//! Packages are read in snapshot order (`serde_json` keeps object key order).

use super::cache::{AdvisoryFeed, CachedSource};
use super::check_status;
use crate::advisory::SecurityAdvisory;
use crate::error::{AuditError, Result};
use crate::types::Severity;
use crate::version::{RangeDialect, VulnerableRangeSet};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const NAME: &str = "pyup";

const SNAPSHOT_URL: &str = "https://raw.githubusercontent.com/pyupio/safety-db/master/data/insecure_full.json";
const META_KEY: &str = "$meta";

pub type PyupSource = CachedSource<PyupFeed>;

#[derive(Debug, Deserialize)]
struct PyupEntry {
    id: String,
    #[serde(default)]
    advisory: String,
    #[serde(default)]
    specs: Vec<String>,
    #[serde(default)]
    cve: Option<String>,
    #[serde(default)]
    more_info_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PyupMeta {
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PyupFeed {
    url: String,
    last_updated_at: Option<DateTime<Utc>>,
}

impl PyupFeed {
    pub fn new() -> Self {
        Self::with_url(SNAPSHOT_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_updated_at: None,
        }
    }

    /// `$meta.timestamp` of the last parsed snapshot
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }
}

impl Default for PyupFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryFeed for PyupFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn artifact_name(&self) -> &'static str {
        "pyup.cache"
    }

    fn fetch(&self, client: &Client) -> Result<Vec<u8>> {
        debug!("Downloading {}", self.url);
        let response = client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()?;
        let snapshot: Value = check_status(NAME, response)?.json()?;
        Ok(serde_json::to_vec(&snapshot)?)
    }

    fn validate(&self, artifact: &[u8]) -> Result<()> {
        serde_json::from_slice::<serde_json::Map<String, Value>>(artifact)?;
        Ok(())
    }

    fn parse(&mut self, artifact: &[u8]) -> Result<Vec<SecurityAdvisory>> {
        let snapshot: serde_json::Map<String, Value> = serde_json::from_slice(artifact)?;

        let mut advisories = Vec::new();
        self.last_updated_at = None;

        for (package_name, value) in snapshot {
            if package_name == META_KEY {
                let meta: PyupMeta = serde_json::from_value(value)?;
                self.last_updated_at = meta.timestamp.and_then(|ts| DateTime::from_timestamp(ts, 0));
                continue;
            }

            let entries: Vec<PyupEntry> = serde_json::from_value(value)
                .map_err(|e| AuditError::parse(format!("pyup entry '{}': {}", package_name, e)))?;
            for entry in entries {
                advisories.push(to_advisory(&package_name, entry)?);
            }
        }

        Ok(advisories)
    }
}

impl PyupSource {
    /// Time the loaded snapshot was generated
    pub fn last_updated_at(&mut self) -> Result<Option<DateTime<Utc>>> {
        self.advisories()?;
        Ok(self.feed().last_updated_at())
    }
}

fn to_advisory(package_name: &str, entry: PyupEntry) -> Result<SecurityAdvisory> {
    let mut range = VulnerableRangeSet::withdrawn();
    for spec in &entry.specs {
        range.extend(VulnerableRangeSet::parse(spec, RangeDialect::Pep440)?);
    }

    let url = match &entry.more_info_path {
        Some(path) => format!("https://pyup.io{}", path),
        None => format!("https://pyup.io/{}", entry.id),
    };
    if let Some(cve) = &entry.cve {
        debug!("{} is also known as {}", entry.id, cve);
    }

    Ok(SecurityAdvisory::builder(entry.id, NAME, package_name)
        .severity(Severity::Unknown)
        .summary(entry.advisory)
        .url(url)
        .range(range)
        .build())
}
