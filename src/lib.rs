pub mod adapter;
pub mod config;
pub mod core;
pub(crate) mod scheduler;

// Re-export commonly used types
pub use crate::adapter::{
    ExpiryCheck, FileAdapter, FileAdapterConfig, GcRange, MemoryAdapter, StorageAdapter,
};
pub use crate::config::CacheConfig;
pub use crate::core::{Cache, CacheError, Call, Envelope, Result, Supplier, TagView};
