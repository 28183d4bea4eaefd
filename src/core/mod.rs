pub mod cache;
pub mod envelope;
pub mod error;
pub(crate) mod order;
pub mod tag_view;

pub use cache::Cache;
pub use envelope::Envelope;
pub use error::{CacheError, Result};
pub use tag_view::{Call, Supplier, TagView};
