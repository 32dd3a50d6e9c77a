//! Google Cloud Storage backend over the JSON API
//!
//! Lists objects with `GET /storage/v1/b/{bucket}/o`, following
//! `nextPageToken`, and downloads them with `alt=media`. The endpoint can
//! be overridden to target an emulator. Authentication is a bearer token
//! read from the environment variable named by `token_env`; without it
//! requests are anonymous (public buckets, emulators).

use crate::backend::{check_status, transport_error, SourceAccessError, SourceBackend, SourceObject};
use serde::Deserialize;
use stairlight_core::{BackendDescriptor, BackendKind, RetryPolicy};
use std::time::Duration;
use tracing::debug;

/// Public endpoint of the JSON API
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,

    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

/// Object storage backend for one bucket
#[derive(Debug, Clone)]
pub struct GcsBackend {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: Option<String>,
    token: Option<String>,
    timeout_secs: u64,
}

impl GcsBackend {
    /// Anonymous backend against `endpoint`
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            prefix: None,
            token: None,
            timeout_secs: RetryPolicy::default().timeout_secs,
        }
    }

    /// Only list objects under this key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build from a descriptor; the request timeout comes from the retry policy
    pub fn from_descriptor(
        descriptor: &BackendDescriptor,
        retry: &RetryPolicy,
    ) -> Result<Self, SourceAccessError> {
        let config_error = |message: String| SourceAccessError::Config {
            backend: descriptor.identifier(),
            message,
        };

        let bucket = descriptor
            .bucket
            .clone()
            .ok_or_else(|| config_error("gcs backend requires 'bucket'".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()
            .map_err(|e| config_error(format!("failed to build HTTP client: {}", e)))?;

        let token = match &descriptor.token_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| config_error(format!("environment variable '{}' is not set", var)))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            endpoint: descriptor
                .endpoint
                .as_deref()
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            bucket,
            prefix: descriptor.prefix.clone(),
            token,
            timeout_secs: retry.timeout_secs,
        })
    }

    /// `gs://bucket/key`
    pub fn object_uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    fn object_name<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix("gs://")
            .and_then(|rest| rest.strip_prefix(self.bucket.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait::async_trait]
impl SourceBackend for GcsBackend {
    fn name(&self) -> &'static str {
        "GCS"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gcs
    }

    fn identifier(&self) -> String {
        format!("gcs:{}", self.bucket)
    }

    async fn list(&self) -> Result<Vec<SourceObject>, SourceAccessError> {
        let url = format!(
            "{}/storage/v1/b/{}/o",
            self.endpoint,
            urlencoding::encode(&self.bucket)
        );
        let listing_path = self.object_uri(self.prefix.as_deref().unwrap_or(""));

        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = Vec::new();
            if let Some(prefix) = &self.prefix {
                query.push(("prefix", prefix.as_str()));
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.as_str()));
            }

            let response = self
                .request(&url)
                .query(&query)
                .send()
                .await
                .map_err(|e| transport_error(self.identifier(), &listing_path, self.timeout_secs, e))?;
            let response = check_status(self.identifier(), &listing_path, response).await?;

            let page: ObjectList = response.json().await.map_err(|e| {
                SourceAccessError::InvalidResponse {
                    backend: self.identifier(),
                    path: listing_path.clone(),
                    message: e.to_string(),
                }
            })?;

            objects.extend(
                page.items
                    .into_iter()
                    .filter(|item| !item.name.ends_with('/'))
                    .map(|item| SourceObject {
                        uri: self.object_uri(&item.name),
                        key: item.name,
                        bucket: Some(self.bucket.clone()),
                    }),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn fetch(&self, uri: &str) -> Result<String, SourceAccessError> {
        let name = self.object_name(uri).ok_or_else(|| SourceAccessError::NotFound {
            backend: self.identifier(),
            path: uri.to_string(),
        })?;

        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(name)
        );

        let response = self
            .request(&url)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport_error(self.identifier(), uri, self.timeout_secs, e))?;
        let response = check_status(self.identifier(), uri, response).await?;

        response
            .text()
            .await
            .map_err(|e| transport_error(self.identifier(), uri, self.timeout_secs, e))
    }
}
