//! Versioned response cache.
//!
//! This module provides the generation-based cache behind the proxy:
//! - Whole-response entries keyed by request identity (method + URL)
//! - Named generations, exactly one of which serves at a time
//! - Seeding a generation atomically from a list of URLs
//! - Activation that retires every obsolete generation

mod lifecycle;
mod storage;
mod store;
mod traits;

pub use lifecycle::{LifecycleError, LifecycleManager};
pub use storage::{CacheStorage, GenerationInfo, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheKey, CacheSource, ResourceEntry};
