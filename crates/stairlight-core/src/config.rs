//! Configuration schema (stairlight.toml / stairlight.yaml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::source::{BackendKind, ResolutionContext};

/// Default file name prefix of the main configuration file
pub const CONFIG_PREFIX: &str = "stairlight";

/// Default file name prefix of mapping files
pub const MAPPING_PREFIX: &str = "mapping";

/// Include/exclude pattern
///
/// A plain string is a glob; `{ regex = "..." }` is a regular expression
/// that must match the whole relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Glob(String),
    Regex { regex: String },
}

impl PatternSpec {
    /// Compile-check the pattern
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Glob(pattern) => glob::Pattern::new(pattern)
                .map(|_| ())
                .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", pattern, e))),
            Self::Regex { regex } => regex::Regex::new(regex)
                .map(|_| ())
                .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", regex, e))),
        }
    }
}

/// One storage backend to scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Backend tag (`fs`, `gcs`)
    #[serde(rename = "type")]
    pub kind: BackendKind,

    /// Root directory (filesystem), relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Bucket name (object storage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Object key prefix to list under (object storage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Project that owns the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Region of an S3 bucket (default `AWS_REGION`, then `us-east-1`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// API endpoint override (emulators, private gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Patterns a relative path must match; empty means `**/*.sql`
    #[serde(default)]
    pub include: Vec<PatternSpec>,

    /// Patterns that exclude a path even when it is included
    #[serde(default)]
    pub exclude: Vec<PatternSpec>,

    /// Prefix applied to table names with at most one dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_table_prefix: Option<String>,
}

impl BackendDescriptor {
    /// Filesystem backend rooted at `path`
    pub fn filesystem(path: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Fs,
            path: Some(path.into()),
            bucket: None,
            prefix: None,
            project_id: None,
            region: None,
            endpoint: None,
            token_env: None,
            include: Vec::new(),
            exclude: Vec::new(),
            default_table_prefix: None,
        }
    }

    /// Object storage backend for `bucket`
    pub fn gcs(bucket: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Gcs,
            path: None,
            bucket: Some(bucket.into()),
            prefix: None,
            project_id: None,
            region: None,
            endpoint: None,
            token_env: None,
            include: Vec::new(),
            exclude: Vec::new(),
            default_table_prefix: None,
        }
    }

    /// S3 backend for `bucket`
    pub fn s3(bucket: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::S3,
            ..Self::gcs(bucket)
        }
    }

    /// Identifier used in error messages: `fs:<path>`, `gcs:<bucket>` or `s3:<bucket>`
    pub fn identifier(&self) -> String {
        let location = if self.kind.is_object_storage() {
            self.bucket.as_deref().unwrap_or("")
        } else {
            self.path.as_deref().unwrap_or("")
        };
        format!("{}:{}", self.kind, location)
    }

    pub fn resolution_context(&self) -> ResolutionContext {
        ResolutionContext::new(self.default_table_prefix.clone())
    }

    /// Check the descriptor is complete for its kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.kind {
            BackendKind::Fs => {
                if self.path.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: filesystem backend requires 'path'",
                        self.identifier()
                    )));
                }
            }
            BackendKind::Gcs | BackendKind::S3 => {
                if self.bucket.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid(format!(
                        "{}: {} backend requires 'bucket'",
                        self.identifier(),
                        self.kind
                    )));
                }
            }
            BackendKind::Other(tag) => {
                return Err(ConfigError::UnsupportedBackend(tag.clone()));
            }
        }

        for pattern in self.include.iter().chain(&self.exclude) {
            pattern.validate()?;
        }

        Ok(())
    }
}

/// Retry/timeout policy for remote backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per remote call, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on each retry
    pub base_delay_ms: u64,

    /// Upper bound on a single delay
    pub max_delay_ms: u64,

    /// Timeout for one remote call
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            timeout_secs: 30,
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// File name prefix of mapping files
    pub mapping_prefix: String,

    /// Upper bound on units fetched/parsed concurrently
    pub concurrency: usize,

    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mapping_prefix: MAPPING_PREFIX.to_string(),
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backends to scan, in order
    #[serde(default)]
    pub include: Vec<BackendDescriptor>,

    #[serde(default)]
    pub settings: Settings,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            settings: Settings::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from a TOML or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = if is_yaml(path) {
            Self::from_yaml(&contents)?
        } else {
            Self::from_toml(&contents)?
        };

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        config.validate()?;
        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load config from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Reject structurally invalid descriptors and settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.concurrency == 0 {
            return Err(ConfigError::Invalid("settings.concurrency must be at least 1".to_string()));
        }
        if self.settings.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("settings.retry.max_attempts must be at least 1".to_string()));
        }
        for backend in &self.include {
            backend.validate()?;
        }
        Ok(())
    }

    /// Resolve a filesystem backend root against the project root
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Find `<prefix>.toml`, `<prefix>.yaml` or `<prefix>.yml` in `dir`
pub fn find_config_file(dir: &Path, prefix: &str) -> Option<PathBuf> {
    ["toml", "yaml", "yml"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", prefix, ext)))
        .find(|candidate| candidate.is_file())
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),
}
