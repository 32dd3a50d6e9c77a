//! Local filesystem backend

use crate::backend::{SourceAccessError, SourceBackend, SourceObject};
use stairlight_core::BackendKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Walks a directory tree recursively; directories are never listed
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    /// Root as written in the configuration (for error messages)
    configured: String,

    /// Root resolved against the project root
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(configured: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            configured: configured.into(),
            root: root.into(),
        }
    }

    fn walk(root: &Path, backend: &str) -> Result<Vec<SourceObject>, SourceAccessError> {
        if !root.is_dir() {
            return Err(SourceAccessError::NotFound {
                backend: backend.to_string(),
                path: root.display().to_string(),
            });
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                match e.io_error() {
                    Some(io) => SourceAccessError::from_io(backend, &path, io),
                    None => SourceAccessError::Io {
                        backend: backend.to_string(),
                        path,
                        message: e.to_string(),
                    },
                }
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            objects.push(SourceObject {
                key,
                uri: entry.path().display().to_string(),
                bucket: None,
            });
        }

        debug!(root = %root.display(), count = objects.len(), "walked filesystem backend");
        Ok(objects)
    }
}

#[async_trait::async_trait]
impl SourceBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "Filesystem"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Fs
    }

    fn identifier(&self) -> String {
        format!("fs:{}", self.configured)
    }

    async fn list(&self) -> Result<Vec<SourceObject>, SourceAccessError> {
        let root = self.root.clone();
        let backend = self.identifier();
        let task_backend = backend.clone();

        tokio::task::spawn_blocking(move || Self::walk(&root, &task_backend))
            .await
            .map_err(|e| SourceAccessError::Io {
                backend,
                path: self.root.display().to_string(),
                message: e.to_string(),
            })?
    }

    /// Read the file; invalid UTF-8 is decoded lossily like remote bodies
    async fn fetch(&self, uri: &str) -> Result<String, SourceAccessError> {
        let bytes = tokio::fs::read(uri)
            .await
            .map_err(|e| SourceAccessError::from_io(&self.identifier(), uri, &e))?;

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(uri, "not valid UTF-8, invalid bytes replaced");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }
}
