//! PyPA advisory-db, OSV documents in YAML

use super::archive::{check_archive, read_members};
use super::cache::{AdvisoryFeed, CachedSource};
use super::check_status;
use super::osv::OsvDocument;
use crate::advisory::SecurityAdvisory;
use crate::error::{AuditError, Result};
use reqwest::blocking::Client;
use tracing::debug;

pub const NAME: &str = "pypa";

const ARCHIVE_URL: &str = "https://github.com/pypa/advisory-db/archive/refs/heads/main.zip";

pub type PypaSource = CachedSource<PypaFeed>;

#[derive(Debug, Clone)]
pub struct PypaFeed {
    url: String,
}

impl PypaFeed {
    pub fn new() -> Self {
        Self::with_url(ARCHIVE_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for PypaFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryFeed for PypaFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn artifact_name(&self) -> &'static str {
        "pypa.cache"
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
        let members = read_members(artifact, |name| name.contains("/vulns/") && name.ends_with(".yaml"))?;

        let mut advisories = Vec::new();
        for (name, content) in members {
            let document: OsvDocument = serde_yaml::from_slice(&content)
                .map_err(|e| AuditError::parse(format!("{}: {}", name, e)))?;
            advisories.extend(document.to_advisories(NAME)?);
        }
        Ok(advisories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::archive::build_zip;
    use crate::sources::AdvisorySource;
    use crate::types::Dependency;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const PYSEC_2019_132: &str = r#"
id: PYSEC-2019-132
details: The urllib3 library 1.24.x before 1.24.2 for Python mishandles certain
  cases where the desired set of CA certificates is different from the OS store of
  CA certificates.
affected:
- package:
    name: urllib3
    ecosystem: PyPI
    purl: pkg:pypi/urllib3
  ranges:
  - type: ECOSYSTEM
    events:
    - introduced: '1.24'
    - fixed: 1.24.2
  versions:
  - '1.24'
  - 1.24.1
references:
- type: ADVISORY
  url: https://nvd.nist.gov/vuln/detail/CVE-2019-11324
aliases:
- CVE-2019-11324
"#;

    const PYSEC_2018_28: &str = r#"
id: PYSEC-2018-28
details: Flask before 0.12.3 is affected by CWE-20 Improper Input Validation.
affected:
- package:
    name: Flask
    ecosystem: PyPI
  ranges:
  - type: ECOSYSTEM
    events:
    - introduced: '0'
    - fixed: 0.12.3
references:
- type: WEB
  url: https://github.com/pallets/flask/pull/2691
"#;

    fn archive() -> Vec<u8> {
        build_zip(&[
            ("advisory-db-main/vulns/urllib3/PYSEC-2019-132.yaml", PYSEC_2019_132),
            ("advisory-db-main/vulns/flask/PYSEC-2018-28.yaml", PYSEC_2018_28),
            ("advisory-db-main/README.md", "# advisory-db"),
        ])
    }

    #[test]
    fn test_parses_vulns_documents() {
        let advisories = PypaFeed::new().parse(&archive()).unwrap();
        assert_eq!(advisories.len(), 2);

        let urllib3 = &advisories[0];
        assert_eq!(urllib3.identifier(), "PYSEC-2019-132");
        assert_eq!(urllib3.source(), "pypa");
        assert_eq!(urllib3.url(), "https://nvd.nist.gov/vuln/detail/CVE-2019-11324");
        assert!(urllib3.is_affected("1.24"));
        assert!(urllib3.is_affected("1.24.1"));
        assert!(!urllib3.is_affected("1.23"));
        assert!(!urllib3.is_affected("1.24.2"));

        let flask = &advisories[1];
        assert_eq!(flask.canonical_name(), "flask");
        assert!(flask.is_affected("0.1"));
        assert!(!flask.is_affected("1.0"));
    }

    #[test]
    fn test_invalid_document_is_parse_error() {
        let artifact = build_zip(&[("db/vulns/x/PYSEC-1.yaml", "details: [unterminated")]);
        assert!(matches!(PypaFeed::new().parse(&artifact), Err(AuditError::ParseError(_))));
    }

    #[test]
    fn test_lookup_from_warm_cache() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pypa.cache"), archive()).unwrap();

        let feed = PypaFeed::with_url("http://127.0.0.1:9/unreachable.zip");
        let mut source = PypaSource::new(feed, dir.path(), Duration::from_secs(3600));

        assert_eq!(source.total_count().unwrap(), 2);
        let (vulnerable, advisories) = source
            .is_vulnerable_package(&Dependency::new("Flask", "0.12.2"))
            .unwrap();
        assert!(vulnerable);
        assert_eq!(advisories[0].identifier(), "PYSEC-2018-28");
    }
}
