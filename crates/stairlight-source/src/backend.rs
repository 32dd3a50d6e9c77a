//! Storage backend trait for listing and fetching SQL sources

use std::sync::Arc;
use stairlight_core::{BackendDescriptor, BackendKind, Config};

/// An object found on a backend, before pattern filtering
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceObject {
    /// Path relative to the backend root, `/`-separated (object key for storage)
    pub key: String,

    /// Resolved access URI (absolute path, `gs://bucket/key` or `s3://bucket/key`)
    pub uri: String,

    /// Bucket name for object storage
    pub bucket: Option<String>,
}

/// Errors that can occur when listing or fetching sources
///
/// Every variant carries the backend identifier and the path involved.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceAccessError {
    #[error("{backend}: not found: {path}")]
    NotFound { backend: String, path: String },

    #[error("{backend}: permission denied for {path}: {message}")]
    PermissionDenied {
        backend: String,
        path: String,
        message: String,
    },

    #[error("{backend}: network error for {path}: {message}")]
    Network {
        backend: String,
        path: String,
        message: String,
    },

    #[error("{backend}: timed out after {seconds}s for {path}")]
    Timeout {
        backend: String,
        path: String,
        seconds: u64,
    },

    #[error("{backend}: invalid response for {path}: {message}")]
    InvalidResponse {
        backend: String,
        path: String,
        message: String,
    },

    #[error("{backend}: I/O error for {path}: {message}")]
    Io {
        backend: String,
        path: String,
        message: String,
    },

    #[error("{backend}: configuration error: {message}")]
    Config { backend: String, message: String },
}

impl SourceAccessError {
    /// Network failures and timeouts may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub fn backend(&self) -> &str {
        match self {
            Self::NotFound { backend, .. }
            | Self::PermissionDenied { backend, .. }
            | Self::Network { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::InvalidResponse { backend, .. }
            | Self::Io { backend, .. }
            | Self::Config { backend, .. } => backend,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::Network { path, .. }
            | Self::Timeout { path, .. }
            | Self::InvalidResponse { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::Config { .. } => None,
        }
    }

    /// Map an I/O error onto the taxonomy
    pub fn from_io(backend: &str, path: &str, error: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => Self::NotFound {
                backend: backend.to_string(),
                path: path.to_string(),
            },
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                backend: backend.to_string(),
                path: path.to_string(),
                message: error.to_string(),
            },
            _ => Self::Io {
                backend: backend.to_string(),
                path: path.to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// Map a reqwest transport failure onto the taxonomy
pub(crate) fn transport_error(backend: String, path: &str, seconds: u64, error: reqwest::Error) -> SourceAccessError {
    if error.is_timeout() {
        SourceAccessError::Timeout {
            backend,
            path: path.to_string(),
            seconds,
        }
    } else {
        SourceAccessError::Network {
            backend,
            path: path.to_string(),
            message: error.to_string(),
        }
    }
}

/// Pass a successful response through; map any other status onto the taxonomy
pub(crate) async fn check_status(
    backend: String,
    path: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceAccessError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let path = path.to_string();
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());

    Err(match status.as_u16() {
        401 | 403 => SourceAccessError::PermissionDenied { backend, path, message },
        404 => SourceAccessError::NotFound { backend, path },
        408 | 429 | 500..=599 => SourceAccessError::Network { backend, path, message },
        _ => SourceAccessError::InvalidResponse { backend, path, message },
    })
}

/// Trait for backends that hold SQL sources
#[async_trait::async_trait]
pub trait SourceBackend: Send + Sync {
    /// Backend name for logs (e.g., "Filesystem", "GCS")
    fn name(&self) -> &'static str;

    /// Tag written into edge annotations
    fn kind(&self) -> BackendKind;

    /// Identifier used in errors, e.g. `fs:sql`, `gcs:my-bucket` or `s3:my-bucket`
    fn identifier(&self) -> String;

    /// Enumerate every object under the configured root
    ///
    /// Each call re-scans the backend.
    async fn list(&self) -> Result<Vec<SourceObject>, SourceAccessError>;

    /// Fetch the text of the object at `uri`
    async fn fetch(&self, uri: &str) -> Result<String, SourceAccessError>;
}

/// Select a backend implementation from the descriptor's `type` tag
pub fn backend_from_descriptor(
    descriptor: &BackendDescriptor,
    config: &Config,
) -> Result<Arc<dyn SourceBackend>, SourceAccessError> {
    let config_error = |message: &str| SourceAccessError::Config {
        backend: descriptor.identifier(),
        message: message.to_string(),
    };

    match &descriptor.kind {
        BackendKind::Fs => {
            let path = descriptor
                .path
                .as_deref()
                .ok_or_else(|| config_error("filesystem backend requires 'path'"))?;
            Ok(Arc::new(crate::FilesystemBackend::new(path, config.resolve_path(path))))
        }
        BackendKind::Gcs => {
            let backend = crate::GcsBackend::from_descriptor(descriptor, &config.settings.retry)?;
            Ok(Arc::new(backend))
        }
        BackendKind::S3 => {
            let backend = crate::S3Backend::from_descriptor(descriptor, &config.settings.retry)?;
            Ok(Arc::new(backend))
        }
        BackendKind::Other(tag) => Err(config_error(&format!("unsupported backend type '{}'", tag))),
    }
}
