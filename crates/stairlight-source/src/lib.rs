//! Source location for SQL lineage
//!
//! Enumerates SQL files on storage backends under include/exclude
//! patterns and fetches their text.
//!
//! ## Backends
//!
//! - `fs` - local directory tree
//! - `gcs` - Google Cloud Storage JSON API (or a compatible emulator)
//! - `s3` - Amazon S3 REST API (or a compatible store)
//! - in-memory backend for tests and dry runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use stairlight_core::{BackendDescriptor, Config};
//! use stairlight_source::Locator;
//!
//! let config = Config::default();
//! let descriptor = BackendDescriptor::filesystem("sql");
//! let locator = Locator::from_descriptor(&descriptor, &config)?;
//! for candidate in locator.locate().await? {
//!     let text = locator.fetch(&candidate).await?;
//! }
//! ```

pub mod backend;
pub mod filesystem;
pub mod gcs;
pub mod locator;
pub mod memory;
pub mod retry;
pub mod s3;

pub use backend::{backend_from_descriptor, SourceAccessError, SourceBackend, SourceObject};
pub use filesystem::FilesystemBackend;
pub use gcs::GcsBackend;
pub use locator::{Candidate, Candidates, Locator};
pub use memory::MemoryBackend;
pub use retry::with_retry;
pub use s3::{S3Backend, S3Credentials};
