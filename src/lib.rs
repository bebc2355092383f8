//! # dependency_advisory_audit
//!
//! Audit pinned Python dependencies against security advisory feeds:
//! - **Advisory sources**: gemnasium-db, PyPA advisory-db, pyup.io safety-db,
//!   GitHub security advisories and the osv.dev query API
//! - **Version ranges**: every feed's range dialect normalized into one model
//! - **CVSS scoring**: v2 and v3 base scores and severity ratings
//! - **Ignore lists**: time-limited suppressions per advisory and package
//!
//! ## Quick Start
//!
//! ```no_run
//! use dependency_advisory_audit::{
//!     audit_with_configuration, extract_dependencies_from, Configuration, IgnoreList, SourceRegistry,
//! };
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let configuration = Configuration::builder().source("pyup").source("gemnasium").build();
//! let registry = SourceRegistry::with_defaults();
//! let dependencies = extract_dependencies_from(Path::new("requirements.txt"), None)?;
//! let ignore = IgnoreList::load(&configuration.ignore_file)?;
//!
//! for finding in audit_with_configuration(&configuration, &registry, &dependencies, &ignore)? {
//!     println!("{}=={}: {} ({})", finding.name, finding.version, finding.identifier, finding.severity);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - Sources cache their feed on disk and refresh it once it expires
//! - Deterministic finding order: source, then dependency, then advisory
//! - Reads requirements.txt, poetry.lock and Pipfile.lock
//! - CLI tool with colored console and JSON output

pub mod advisory;
mod audit;
mod config;
pub mod cvss;
mod error;
pub mod ignore;
mod parser;
pub mod sources;
mod types;
pub mod version;

// Re-export public API
pub use advisory::SecurityAdvisory;
pub use audit::{audit, audit_with_configuration, audit_with_progress, AuditSummary};
pub use config::{default_cache_dir, Configuration, ConfigurationBuilder, NetworkConfig, ReportFormat};
pub use cvss::CvssVector;
pub use error::{AuditError, Result};
pub use ignore::{IgnoreEntry, IgnoreList};
pub use parser::{extract_dependencies_from, read_dependencies, resolve_format, DependencyFormat};
pub use sources::{AdvisorySource, LookupPolicy, SourceRegistry, SourceSettings};
pub use types::{canonicalize_name, Dependency, DependencyLocation, Finding, IgnoreStatus, Severity};
pub use version::{RangeDialect, Version, VulnerableRangeSet};
