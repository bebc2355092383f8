//! Advisory sources and the registry that builds them by name
//!
//! Every source answers the same questions: is a package known, and which of
//! its advisories affect a given version. Archive and snapshot feeds share the
//! cache protocol in [`cache`]; the OSV source queries the remote API for
//! every dependency instead.

mod archive;
pub mod cache;
pub mod gemnasium;
pub mod github;
pub mod osv;
pub mod pypa;
pub mod pyup;

use crate::advisory::SecurityAdvisory;
use crate::config::NetworkConfig;
use crate::error::{AuditError, Result};
use crate::types::Dependency;
use reqwest::blocking::{Client, Response};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use cache::{AdvisoryFeed, CachedSource, IndexState};
pub use gemnasium::{GemnasiumFeed, GemnasiumSource};
pub use github::{GithubFeed, GithubSource};
pub use osv::OsvSource;
pub use pypa::{PypaFeed, PypaSource};
pub use pyup::{PyupFeed, PyupSource};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// How a source decides whether a dependency needs a vulnerability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPolicy {
    /// Only packages present in the local index are checked
    PresenceIndex,
    /// Every dependency is checked; the source has no enumerable index
    AlwaysQuery,
}

/// A feed of security advisories for Python packages
pub trait AdvisorySource {
    /// Registered name, also used as the `source` of produced advisories
    fn name(&self) -> &str;

    fn lookup_policy(&self) -> LookupPolicy;

    /// Location of the on-disk artifact, `None` for sources without one
    fn cache_path(&self) -> Option<PathBuf>;

    /// Whether the artifact is missing or older than the configured expiry
    fn requires_update(&self) -> bool;

    /// Refresh the artifact from the remote feed
    fn update(&mut self) -> Result<()>;

    /// Rebuild the in-memory index from the existing artifact
    fn populate_from_cache(&mut self) -> Result<()>;

    /// Number of distinct packages in the index
    fn total_count(&mut self) -> Result<usize>;

    fn has_security_advisory_for(&mut self, dependency: &Dependency) -> Result<bool>;

    /// Advisories affecting the dependency's pinned version, in feed order
    fn is_vulnerable_package(
        &mut self,
        dependency: &Dependency,
    ) -> Result<(bool, Vec<SecurityAdvisory>)>;
}

/// Inputs every source factory receives
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub cache_dir: PathBuf,
    pub cache_expires: Duration,
    pub network: NetworkConfig,
}

impl SourceSettings {
    pub fn new(cache_dir: impl Into<PathBuf>, cache_expires: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cache_expires,
            network: NetworkConfig::default(),
        }
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Constructor registered for a source name
pub type SourceFactory = Box<dyn Fn(&SourceSettings) -> Result<Box<dyn AdvisorySource>> + Send + Sync>;

/// Name to factory mapping used to build the configured sources
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with gemnasium, github, osv, pypa and pyup
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, fn(&SourceSettings) -> Result<Box<dyn AdvisorySource>>); 5] = [
            (gemnasium::NAME, create_gemnasium),
            (github::NAME, create_github),
            (osv::NAME, create_osv),
            (pypa::NAME, create_pypa),
            (pyup::NAME, create_pyup),
        ];
        for (name, factory) in defaults {
            registry.factories.insert(name.to_string(), Box::new(factory));
        }
        registry
    }

    /// Register a factory; empty and duplicate names are rejected
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&SourceSettings) -> Result<Box<dyn AdvisorySource>> + Send + Sync + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuditError::config("source name must not be empty"));
        }
        if self.factories.contains_key(name) {
            return Err(AuditError::config(format!("source '{}' is already registered", name)));
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the source registered under `name`
    pub fn create(&self, name: &str, settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            AuditError::config(format!(
                "unknown source '{}', available: {}",
                name,
                self.names().join(", ")
            ))
        })?;
        factory(settings)
    }

    /// Build every named source, keeping the given order
    pub fn create_all<S: AsRef<str>>(
        &self,
        names: &[S],
        settings: &SourceSettings,
    ) -> Result<Vec<Box<dyn AdvisorySource>>> {
        names.iter().map(|name| self.create(name.as_ref(), settings)).collect()
    }
}

fn create_gemnasium(settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
    Ok(Box::new(GemnasiumSource::from_settings(GemnasiumFeed::new(), settings)))
}

fn create_github(settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
    let feed = GithubFeed::new(settings.network.github_token.clone());
    Ok(Box::new(GithubSource::from_settings(feed, settings)))
}

fn create_osv(settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
    Ok(Box::new(OsvSource::new(settings.network.clone())))
}

fn create_pypa(settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
    Ok(Box::new(PypaSource::from_settings(PypaFeed::new(), settings)))
}

fn create_pyup(settings: &SourceSettings) -> Result<Box<dyn AdvisorySource>> {
    Ok(Box::new(PyupSource::from_settings(PyupFeed::new(), settings)))
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

/// Keep the candidates that affect `version`, preserving order
pub(crate) fn select_affected<'a, I>(candidates: I, version: &str) -> (bool, Vec<SecurityAdvisory>)
where
    I: IntoIterator<Item = &'a SecurityAdvisory>,
{
    let affected: Vec<SecurityAdvisory> = candidates
        .into_iter()
        .filter(|advisory| advisory.is_affected(version))
        .cloned()
        .collect();
    (!affected.is_empty(), affected)
}

/// Build a blocking HTTP client
pub(crate) fn build_client(network: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(network.timeout())
        .build()
        .map_err(|e| AuditError::network(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success status to an API error
pub(crate) fn check_status(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 404 {
        return Err(AuditError::api(service, "Resource not found"));
    }
    Err(AuditError::api(service, format!("HTTP {}", status)))
}
