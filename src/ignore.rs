//! Ignore list of accepted findings
//!
//! The file is a YAML document keyed by advisory identifier:
//!
//! ```yaml
//! version: '1.0'
//! ignore:
//!   CVE-2019-11324:
//!   - package: urllib3
//!     reason: No immediate remediation.
//!     expires: 2024-01-01T00:00:00+0000
//! ```

use crate::error::{AuditError, Result};
use crate::sources::cache::write_atomically;
use crate::types::canonicalize_name;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DOCUMENT_VERSION: &str = "1.0";
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";
pub const DEFAULT_REASON: &str = "No immediate remediation.";
pub const DEFAULT_DAYS: i64 = 7;

/// One accepted (identifier, package) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreEntry {
    #[serde(skip)]
    pub identifier: String,
    pub package: String,
    #[serde(default)]
    pub reason: String,
    #[serde(with = "expires_format")]
    pub expires: DateTime<FixedOffset>,
}

impl IgnoreEntry {
    /// Whether the entry still suppresses findings at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }

    pub fn expires_string(&self) -> String {
        self.expires.format(EXPIRES_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IgnoreDocument {
    version: String,
    #[serde(default)]
    /// File order is kept so saving only ever appends
    ignore: IndexMap<String, Vec<IgnoreEntry>>,
}

impl Default for IgnoreDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            ignore: IndexMap::new(),
        }
    }
}

/// Ignore file loaded into memory; changes persist only through [`IgnoreList::save`]
#[derive(Debug, Clone)]
pub struct IgnoreList {
    path: PathBuf,
    document: IgnoreDocument,
}

impl IgnoreList {
    /// An empty list that would be saved to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: IgnoreDocument::default(),
        }
    }

    /// Read the list at `path`; a missing file yields an empty list
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("No ignore file at {}", path.display());
            return Ok(Self::empty(path));
        }

        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::empty(path));
        }

        let mut document: IgnoreDocument = serde_yaml::from_str(&content)
            .map_err(|e| AuditError::parse(format!("{}: {}", path.display(), e)))?;
        for (identifier, entries) in document.ignore.iter_mut() {
            for entry in entries {
                entry.identifier = identifier.clone();
            }
        }

        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn is_empty(&self) -> bool {
        self.document.ignore.values().all(|entries| entries.is_empty())
    }

    /// Entries recorded for an identifier, in file order
    pub fn entries(&self, identifier: &str) -> &[IgnoreEntry] {
        self.document
            .ignore
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Look up the first entry for `identifier` and `package`
    ///
    /// Returns whether the finding is ignored right now, and the matching entry
    /// even when it has expired.
    pub fn should_ignore(&self, identifier: &str, package: &str) -> (bool, Option<IgnoreEntry>) {
        self.should_ignore_at(identifier, package, Utc::now())
    }

    pub fn should_ignore_at(
        &self,
        identifier: &str,
        package: &str,
        now: DateTime<Utc>,
    ) -> (bool, Option<IgnoreEntry>) {
        let package = canonicalize_name(package);
        let found = self
            .entries(identifier)
            .iter()
            .find(|entry| canonicalize_name(&entry.package) == package);

        match found {
            Some(entry) => (entry.is_active_at(now), Some(entry.clone())),
            None => (false, None),
        }
    }

    /// Append an entry; existing entries are kept
    pub fn add(
        &mut self,
        identifier: &str,
        package: &str,
        reason: &str,
        expires: DateTime<FixedOffset>,
    ) {
        let entry = IgnoreEntry {
            identifier: identifier.to_string(),
            package: package.to_string(),
            reason: reason.to_string(),
            expires,
        };
        self.document
            .ignore
            .entry(identifier.to_string())
            .or_default()
            .push(entry);
    }

    /// Write the whole document back to its path
    pub fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(&self.document)?;
        write_atomically(&self.path, content.as_bytes())?;
        debug!("Saved ignore list to {}", self.path.display());
        Ok(())
    }
}

/// Expiry `days` from now in UTC; out-of-range values are a configuration error
pub fn expires_in_days(days: i64) -> Result<DateTime<FixedOffset>> {
    Duration::try_days(days)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map(|expires| expires.fixed_offset())
        .ok_or_else(|| AuditError::config(format!("cannot ignore a finding for {} days", days)))
}

mod expires_format {
    use super::EXPIRES_FORMAT;
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(EXPIRES_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_str(raw.trim(), EXPIRES_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
            .map_err(|e| serde::de::Error::custom(format!("invalid expires '{}': {}", raw, e)))
    }
}
