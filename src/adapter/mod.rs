//! Storage backends
//!
//! A backend stores opaque envelopes keyed by `(name, tag)` and knows how to
//! bulk-delete a tag namespace and garbage-collect expired entries. Backends
//! are constructed from a plain options struct and must be usable
//! immediately after construction.

pub mod file;
pub mod memory;

pub use file::{FileAdapter, FileAdapterConfig};
pub use memory::MemoryAdapter;

use crate::core::envelope::Envelope;
use crate::core::error::Result;
use async_trait::async_trait;

/// One slice of a garbage-collection cycle split into `parts` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRange {
    /// Which slice of the cycle this run covers, `0..parts`
    pub index: usize,
    /// Total number of slices in a full cycle
    pub parts: usize,
}

impl GcRange {
    /// Whether this run closes a cycle (the last slice).
    pub fn is_final(&self) -> bool {
        self.index + 1 >= self.parts
    }
}

/// Staleness predicate handed to `gc`, evaluated against each stored envelope.
pub type ExpiryCheck<'a> = &'a (dyn Fn(&Envelope) -> bool + Send + Sync);

/// Contract every storage backend must satisfy.
///
/// Absence is `Ok(None)`, never an error. `gc` implementations may honor the
/// optional range to restrict a sweep to an evenly sliced subset of their
/// storage, enabling amortized collection across scheduled runs; backends
/// without partial support simply ignore it.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, name: &str, tag: Option<&str>) -> Result<Option<Envelope>>;

    async fn set(&self, name: &str, envelope: &Envelope, tag: Option<&str>) -> Result<()>;

    async fn clear(&self, name: &str, tag: Option<&str>) -> Result<()>;

    async fn clear_tag(&self, tag: &str) -> Result<()>;

    async fn gc(&self, is_expired: ExpiryCheck<'_>, range: Option<GcRange>) -> Result<()>;
}
