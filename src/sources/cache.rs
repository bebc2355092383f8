//! Cache and index protocol shared by artifact-backed feeds

use super::{build_client, select_affected, AdvisorySource, LookupPolicy, SourceSettings};
use crate::advisory::SecurityAdvisory;
use crate::config::NetworkConfig;
use crate::error::{AuditError, Result};
use crate::types::Dependency;
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Transport and format of a feed that is mirrored into one local artifact
pub trait AdvisoryFeed {
    fn name(&self) -> &'static str;

    /// File name of the artifact inside the cache directory
    fn artifact_name(&self) -> &'static str;

    /// Download the complete artifact
    fn fetch(&self, client: &Client) -> Result<Vec<u8>>;

    /// Reject a download that could not be parsed later; runs before the cached artifact is replaced
    fn validate(&self, artifact: &[u8]) -> Result<()>;

    /// Turn the artifact into advisories, in feed order
    fn parse(&mut self, artifact: &[u8]) -> Result<Vec<SecurityAdvisory>>;
}

/// Load state of the in-memory index
#[derive(Debug, Default)]
pub enum IndexState {
    #[default]
    NotLoaded,
    Loading,
    Loaded(HashMap<String, Vec<SecurityAdvisory>>),
}

impl IndexState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// An [`AdvisorySource`] backed by a locally cached artifact
#[derive(Debug)]
pub struct CachedSource<F> {
    feed: F,
    cache_dir: PathBuf,
    cache_expires: Duration,
    network: NetworkConfig,
    index: IndexState,
}

impl<F: AdvisoryFeed> CachedSource<F> {
    pub fn new(feed: F, cache_dir: impl Into<PathBuf>, cache_expires: Duration) -> Self {
        Self {
            feed,
            cache_dir: cache_dir.into(),
            cache_expires,
            network: NetworkConfig::default(),
            index: IndexState::NotLoaded,
        }
    }

    pub fn from_settings(feed: F, settings: &SourceSettings) -> Self {
        Self::new(feed, settings.cache_dir.clone(), settings.cache_expires).with_network(settings.network.clone())
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn index_state(&self) -> &IndexState {
        &self.index
    }

    fn artifact_path(&self) -> PathBuf {
        self.cache_dir.join(self.feed.artifact_name())
    }

    /// The index, loading it first when needed
    ///
    /// A stale artifact is refreshed once. When the refresh fails and an older
    /// artifact exists, that artifact is used instead.
    pub fn advisories(&mut self) -> Result<&HashMap<String, Vec<SecurityAdvisory>>> {
        if !self.index.is_loaded() {
            self.load()?;
        }
        match &self.index {
            IndexState::Loaded(index) => Ok(index),
            _ => Err(AuditError::parse(format!("index of '{}' failed to load", self.feed.name()))),
        }
    }

    fn load(&mut self) -> Result<()> {
        if self.requires_update() {
            if let Err(err) = self.update() {
                if !self.artifact_path().is_file() {
                    return Err(err);
                }
                warn!(
                    "Failed to update '{}', using stale cache {}: {}",
                    self.feed.name(),
                    self.artifact_path().display(),
                    err
                );
            }
        }
        self.populate_from_cache()
    }
}

impl<F: AdvisoryFeed> AdvisorySource for CachedSource<F> {
    fn name(&self) -> &str {
        self.feed.name()
    }

    fn lookup_policy(&self) -> LookupPolicy {
        LookupPolicy::PresenceIndex
    }

    fn cache_path(&self) -> Option<PathBuf> {
        Some(self.artifact_path())
    }

    fn requires_update(&self) -> bool {
        is_stale(&self.artifact_path(), self.cache_expires)
    }

    fn update(&mut self) -> Result<()> {
        info!("Updating '{}' advisories", self.feed.name());
        let client = build_client(&self.network)?;
        let artifact = self.feed.fetch(&client)?;
        self.feed.validate(&artifact)?;

        let path = self.artifact_path();
        write_atomically(&path, &artifact)?;
        debug!("Wrote {} bytes to {}", artifact.len(), path.display());

        self.index = IndexState::NotLoaded;
        Ok(())
    }

    fn populate_from_cache(&mut self) -> Result<()> {
        self.index = IndexState::Loading;

        let path = self.artifact_path();
        let parsed = fs::read(&path)
            .map_err(AuditError::from)
            .and_then(|artifact| self.feed.parse(&artifact));

        let advisories = match parsed {
            Ok(advisories) => advisories,
            Err(err) => {
                self.index = IndexState::NotLoaded;
                return Err(err);
            }
        };

        let mut index: HashMap<String, Vec<SecurityAdvisory>> = HashMap::new();
        for advisory in advisories {
            index
                .entry(advisory.canonical_name().to_string())
                .or_default()
                .push(advisory);
        }

        debug!("Loaded {} packages from {}", index.len(), path.display());
        self.index = IndexState::Loaded(index);
        Ok(())
    }

    fn total_count(&mut self) -> Result<usize> {
        Ok(self.advisories()?.len())
    }

    fn has_security_advisory_for(&mut self, dependency: &Dependency) -> Result<bool> {
        Ok(self.advisories()?.contains_key(dependency.canonical_name()))
    }

    fn is_vulnerable_package(
        &mut self,
        dependency: &Dependency,
    ) -> Result<(bool, Vec<SecurityAdvisory>)> {
        match self.advisories()?.get(dependency.canonical_name()) {
            Some(candidates) => Ok(select_affected(candidates, dependency.version())),
            None => Ok((false, Vec::new())),
        }
    }
}

/// Missing artifacts and artifacts at least `expires` old are stale
fn is_stale(path: &Path, expires: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= expires,
        // mtime in the future
        Err(_) => false,
    }
}

/// Replace `path` with `contents` without ever exposing a partial file
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AuditError::IoError(e.error))?;
    Ok(())
}
