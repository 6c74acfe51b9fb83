//! Client lifecycle: the cached database handle.
//!
//! # Module Structure
//! - `handle`: [`DatabaseHandle`], one open connection for one configuration
//! - `cache`: [`ClientCache`], the construct-once single-slot cache

mod cache;
mod handle;

pub use cache::ClientCache;
pub use handle::DatabaseHandle;
