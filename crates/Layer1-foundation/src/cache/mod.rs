//! # r2r Cache
//!
//! Registry metadata cache. Avoids a registry round-trip for every invocation
//! while keeping stale data from answering resolution queries.
//!
//! ```text
//! resolve ──▶ RegistryCache::get ──fresh──▶ tags
//!                  │
//!                stale / missing
//!                  ▼
//!            RegistryClient::list_tags ──▶ RegistryCache::put + persist
//! ```

mod registry;

pub use registry::{CacheEntry, CatalogueEntry, RegistryCache, CACHE_FILE_NAME};
