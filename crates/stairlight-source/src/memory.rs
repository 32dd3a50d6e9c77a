//! In-memory backend for testing
//!
//! Holds SQL text by key without touching any storage. Useful for:
//! - Unit testing the pipeline without fixtures on disk
//! - Simulating object storage (bucket names, `gs://` URIs)
//! - Simulating listing failures, flaky fetches and latency
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stairlight_source::{MemoryBackend, SourceBackend};
//!
//! let backend = MemoryBackend::new("sql");
//! backend.add_source("main/a.sql", "SELECT * FROM proj.ds.a").await;
//!
//! let objects = backend.list().await?;
//! let text = backend.fetch(&objects[0].uri).await?;
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Listing fails as if the bucket were unreachable
//! let backend = MemoryBackend::new("sql").with_listing_failure();
//!
//! // The first two fetches fail with a transient network error
//! let backend = MemoryBackend::new("sql").with_transient_failures(2);
//! ```

use crate::backend::{SourceAccessError, SourceBackend, SourceObject};
use stairlight_core::BackendKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory source backend
///
/// Cloning shares the stored sources and the failure counters.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Root name used in identifiers and URIs
    root: String,

    /// Kind reported to the pipeline (`fs` unless `as_object_storage`)
    kind: BackendKind,

    /// Sources by key
    sources: Arc<RwLock<BTreeMap<String, String>>>,

    /// Errors to return when fetching specific keys
    errors: Arc<RwLock<HashMap<String, SourceAccessError>>>,

    /// Fail every listing
    fail_listing: bool,

    /// Remaining fetches to fail with a transient error
    transient_failures: Arc<AtomicU32>,

    /// Number of fetch calls made
    fetch_calls: Arc<AtomicU32>,

    /// Simulated latency per call (milliseconds)
    latency_ms: u64,
}

impl MemoryBackend {
    /// Create an empty filesystem-like backend named `root`
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            kind: BackendKind::Fs,
            sources: Arc::new(RwLock::new(BTreeMap::new())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            fail_listing: false,
            transient_failures: Arc::new(AtomicU32::new(0)),
            fetch_calls: Arc::new(AtomicU32::new(0)),
            latency_ms: 0,
        }
    }

    /// Create a backend from a map of key to SQL text
    pub fn from_sources<K, V>(root: impl Into<String>, sources: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let backend = Self::new(root);
        let map: BTreeMap<String, String> = sources
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            sources: Arc::new(RwLock::new(map)),
            ..backend
        }
    }

    /// Report objects as living in bucket `root` (`gcs` kind, `gs://` URIs)
    pub fn as_object_storage(mut self) -> Self {
        self.kind = BackendKind::Gcs;
        self
    }

    /// Add or replace a source
    pub async fn add_source(&self, key: impl Into<String>, text: impl Into<String>) {
        self.sources.write().await.insert(key.into(), text.into());
    }

    /// Configure an error to be returned when fetching `key`
    pub async fn add_error_for_key(&self, key: impl Into<String>, error: SourceAccessError) {
        self.errors.write().await.insert(key.into(), error);
    }

    /// Fail every listing with a permission error
    pub fn with_listing_failure(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Fail the next `count` fetches with a transient network error
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of fetch calls made so far, failed ones included
    pub fn fetch_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn uri_for(&self, key: &str) -> String {
        match self.kind {
            BackendKind::Gcs => format!("gs://{}/{}", self.root, key),
            _ => format!("mem://{}/{}", self.root, key),
        }
    }

    fn key_for<'a>(&self, uri: &'a str) -> Option<&'a str> {
        let scheme = match self.kind {
            BackendKind::Gcs => "gs://",
            _ => "mem://",
        };
        uri.strip_prefix(scheme)
            .and_then(|rest| rest.strip_prefix(self.root.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl SourceBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn kind(&self) -> BackendKind {
        self.kind.clone()
    }

    fn identifier(&self) -> String {
        format!("{}:{}", self.kind, self.root)
    }

    async fn list(&self) -> Result<Vec<SourceObject>, SourceAccessError> {
        self.simulate_latency().await;

        if self.fail_listing {
            return Err(SourceAccessError::PermissionDenied {
                backend: self.identifier(),
                path: self.root.clone(),
                message: "simulated listing failure".to_string(),
            });
        }

        let bucket = self.kind.is_object_storage().then(|| self.root.clone());
        Ok(self
            .sources
            .read()
            .await
            .keys()
            .map(|key| SourceObject {
                key: key.clone(),
                uri: self.uri_for(key),
                bucket: bucket.clone(),
            })
            .collect())
    }

    async fn fetch(&self, uri: &str) -> Result<String, SourceAccessError> {
        self.simulate_latency().await;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceAccessError::Network {
                backend: self.identifier(),
                path: uri.to_string(),
                message: "simulated transient failure".to_string(),
            });
        }

        let not_found = || SourceAccessError::NotFound {
            backend: self.identifier(),
            path: uri.to_string(),
        };
        let key = self.key_for(uri).ok_or_else(not_found)?;

        if let Some(error) = self.errors.read().await.get(key) {
            return Err(error.clone());
        }

        self.sources.read().await.get(key).cloned().ok_or_else(not_found)
    }
}
