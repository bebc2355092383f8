//! Error types for the audit system

use thiserror::Error;

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Main error type for audit operations
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to parse advisory data: {0}")]
    ParseError(String),

    #[error("Invalid version range '{expr}': {message}")]
    InvalidRange { expr: String, message: String },

    #[error("Invalid CVSS vector '{vector}': {message}")]
    InvalidCvss { vector: String, message: String },

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Network error: {0}")]
    NetworkError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("API error from {service}: {message}")]
    ApiError { service: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported file or format '{0}'")]
    UnsupportedFormat(String),

    #[error("Source '{source_name}' requires credentials: set {variable}")]
    MissingCredential {
        source_name: String,
        variable: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),
}

#[derive(Debug)]
struct StringError(String);

impl std::fmt::Display for StringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StringError {}

impl AuditError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a version range error
    pub fn range(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRange {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// Create a CVSS vector error
    pub fn cvss(vector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCvss {
            vector: vector.into(),
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(Box::new(StringError(msg.into())))
    }

    /// Create an API error
    pub fn api(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiError {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a missing credential error
    pub fn missing_credential(source_name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self::MissingCredential {
            source_name: source_name.into(),
            variable: variable.into(),
        }
    }

    /// Whether this error came from reaching a remote feed
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::ApiError { .. } | Self::ReqwestError(_) | Self::ZipError(_)
        )
    }
}
