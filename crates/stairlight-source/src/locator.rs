//! Source Locator: filter a backend listing into sorted SQL candidates

use crate::backend::{backend_from_descriptor, SourceAccessError, SourceBackend, SourceObject};
use crate::retry::with_retry;
use regex::Regex;
use stairlight_core::{BackendDescriptor, BackendKind, Config, ConfigError, PatternSpec, ResolutionContext, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, info};

/// A located SQL file, not yet fetched or template-expanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: BackendKind,
    pub key: String,
    pub uri: String,
    pub bucket: Option<String>,
    pub context: ResolutionContext,
}

/// Candidates of one `locate` call, in lexicographic key order
///
/// Consumed once; call `locate` again to re-scan.
#[derive(Debug)]
pub struct Candidates {
    inner: std::vec::IntoIter<Candidate>,
}

impl Iterator for Candidates {
    type Item = Candidate;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Candidates {}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl Matcher {
    fn compile(spec: &PatternSpec) -> Result<Self, ConfigError> {
        match spec {
            PatternSpec::Glob(pattern) => glob::Pattern::new(pattern)
                .map(Self::Glob)
                .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", pattern, e))),
            PatternSpec::Regex { regex } => Regex::new(&format!("^(?:{})$", regex))
                .map(Self::Regex)
                .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", regex, e))),
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Glob(pattern) => pattern.matches(key),
            Self::Regex(regex) => regex.is_match(key),
        }
    }
}

/// Locates SQL candidates on one backend
pub struct Locator {
    backend: Arc<dyn SourceBackend>,
    include: Vec<Matcher>,
    exclude: Vec<Matcher>,
    context: ResolutionContext,
    retry: RetryPolicy,
}

impl Locator {
    /// Locator over an existing backend
    pub fn new(
        backend: Arc<dyn SourceBackend>,
        descriptor: &BackendDescriptor,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let compile = |specs: &[PatternSpec]| -> Result<Vec<Matcher>, ConfigError> {
            specs.iter().map(Matcher::compile).collect()
        };

        Ok(Self {
            backend,
            include: compile(&descriptor.include)?,
            exclude: compile(&descriptor.exclude)?,
            context: descriptor.resolution_context(),
            retry,
        })
    }

    /// Locator with the backend selected by the descriptor's kind
    pub fn from_descriptor(
        descriptor: &BackendDescriptor,
        config: &Config,
    ) -> Result<Self, SourceAccessError> {
        let backend = backend_from_descriptor(descriptor, config)?;
        Self::new(backend, descriptor, config.settings.retry.clone()).map_err(|e| {
            SourceAccessError::Config {
                backend: descriptor.identifier(),
                message: e.to_string(),
            }
        })
    }

    pub fn backend(&self) -> &Arc<dyn SourceBackend> {
        &self.backend
    }

    /// Include/exclude decision for a key; exclusion wins
    pub fn is_selected(&self, key: &str) -> bool {
        let included = if self.include.is_empty() {
            key.to_lowercase().ends_with(".sql")
        } else {
            self.include.iter().any(|m| m.matches(key))
        };
        included && !self.exclude.iter().any(|m| m.matches(key))
    }

    /// List the backend and return matching candidates sorted by key
    ///
    /// Any listing failure (after retries) fails the whole operation.
    pub async fn locate(&self) -> Result<Candidates, SourceAccessError> {
        let identifier = self.backend.identifier();
        let objects = with_retry(&self.retry, &identifier, "<list>", || self.backend.list()).await?;
        let listed = objects.len();

        let mut selected: Vec<SourceObject> = objects
            .into_iter()
            .filter(|object| self.is_selected(&object.key))
            .collect();
        selected.sort();
        selected.dedup_by(|a, b| a.key == b.key);

        info!("{}: {} of {} objects selected", identifier, selected.len(), listed);

        let kind = self.backend.kind();
        let candidates: Vec<Candidate> = selected
            .into_iter()
            .map(|object| Candidate {
                kind: kind.clone(),
                key: object.key,
                uri: object.uri,
                bucket: object.bucket,
                context: self.context.clone(),
            })
            .collect();

        Ok(Candidates {
            inner: candidates.into_iter(),
        })
    }

    /// Fetch a candidate's text under the retry policy
    pub async fn fetch(&self, candidate: &Candidate) -> Result<String, SourceAccessError> {
        debug!("fetching {}", candidate.uri);
        with_retry(&self.retry, &self.backend.identifier(), &candidate.key, || {
            self.backend.fetch(&candidate.uri)
        })
        .await
    }
}
