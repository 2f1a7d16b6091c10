//! Caches shared by the analyzer and the authorization core.

pub mod cache;
pub mod file_cache;

pub use cache::{CacheEntry, CacheStats, TtlStore};
pub use file_cache::{fingerprint, FileCache, MemoryFileCache, NoopFileCache};
