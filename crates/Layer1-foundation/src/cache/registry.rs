//! Registry cache
//!
//! Per-extension tag metadata plus the extension catalogue, persisted as one
//! JSON document. Freshness is decided at query time from the stored
//! timestamp, so an entry can go stale between two calls in one process.

use crate::config::CacheSettings;
use crate::storage::JsonStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// 캐시 파일명
pub const CACHE_FILE_NAME: &str = "registry-cache.json";

const CACHE_FORMAT_VERSION: u32 = 1;

/// Tags known for one extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub extension_name: String,
    /// Registry order (most recent first), deduplicated
    pub tags: Vec<String>,
    /// Most recently produced content-addressed tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_pinned: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_fresh(self.fetched_at, now, ttl)
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// One extension published in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub name: String,
    pub image_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Catalogue {
    extensions: Vec<CatalogueEntry>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalogue: Option<Catalogue>,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            entries: BTreeMap::new(),
            catalogue: None,
        }
    }
}

/// Durable, TTL-bounded registry cache
#[derive(Debug)]
pub struct RegistryCache {
    store: JsonStore,
    filename: String,
    ttl: Duration,
    doc: CacheDocument,
}

impl RegistryCache {
    /// Load the cache file; a missing or unreadable file yields an empty cache
    pub fn load(path: &Path, ttl: Duration) -> Self {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| CACHE_FILE_NAME.to_string());
        let store = JsonStore::new(dir);

        let doc = match store.load_optional::<CacheDocument>(&filename) {
            Ok(Some(doc)) if doc.version == CACHE_FORMAT_VERSION => doc,
            Ok(Some(doc)) => {
                debug!(
                    "Ignoring registry cache with format version {} at {}",
                    doc.version,
                    path.display()
                );
                CacheDocument::default()
            }
            Ok(None) => CacheDocument::default(),
            Err(e) => {
                warn!("Ignoring unreadable registry cache {}: {}", path.display(), e);
                CacheDocument::default()
            }
        };

        Self {
            store,
            filename,
            ttl,
            doc,
        }
    }

    /// Cache at the configured (or default per-user) location
    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let path = match &settings.path {
            Some(path) => path.clone(),
            None => JsonStore::user_cache()?.file_path(CACHE_FILE_NAME),
        };
        Ok(Self::load(&path, settings.ttl()))
    }

    pub fn path(&self) -> PathBuf {
        self.store.file_path(&self.filename)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty() && self.doc.catalogue.is_none()
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Entry for `name` and whether it is fresh now
    pub fn get(&self, name: &str) -> Option<(&CacheEntry, bool)> {
        self.get_at(name, Utc::now())
    }

    pub fn get_at(&self, name: &str, now: DateTime<Utc>) -> Option<(&CacheEntry, bool)> {
        self.doc
            .entries
            .get(name)
            .map(|entry| (entry, entry.is_fresh_at(now, self.ttl)))
    }

    pub fn put(
        &mut self,
        name: &str,
        tags: Vec<String>,
        latest_pinned: Option<String>,
        now: DateTime<Utc>,
    ) {
        let mut seen = HashSet::new();
        let tags = tags.into_iter().filter(|t| seen.insert(t.clone())).collect();
        self.doc.entries.insert(
            name.to_string(),
            CacheEntry {
                extension_name: name.to_string(),
                tags,
                latest_pinned,
                fetched_at: now,
            },
        );
    }

    // ========================================================================
    // Catalogue
    // ========================================================================

    pub fn catalogue(&self) -> Option<(&[CatalogueEntry], bool)> {
        self.catalogue_at(Utc::now())
    }

    pub fn catalogue_at(&self, now: DateTime<Utc>) -> Option<(&[CatalogueEntry], bool)> {
        self.doc.catalogue.as_ref().map(|c| {
            (
                c.extensions.as_slice(),
                is_fresh(c.fetched_at, now, self.ttl),
            )
        })
    }

    pub fn put_catalogue(&mut self, extensions: Vec<CatalogueEntry>, now: DateTime<Utc>) {
        self.doc.catalogue = Some(Catalogue {
            extensions,
            fetched_at: now,
        });
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drop every entry; the file location is kept
    pub fn clear(&mut self) {
        self.doc = CacheDocument::default();
    }

    /// Write the cache file (atomic replace)
    pub fn persist(&self) -> Result<()> {
        self.store.save(&self.filename, &self.doc)?;
        debug!("Registry cache written to {}", self.path().display());
        Ok(())
    }
}

/// `now - fetched_at < ttl`; timestamps from the future count as stale
fn is_fresh(fetched_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    let age = now.signed_duration_since(fetched_at);
    if age < chrono::Duration::zero() {
        return false;
    }
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::max_value());
    age < ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(300);

    fn cache_in(dir: &Path) -> RegistryCache {
        RegistryCache::load(&dir.join(CACHE_FILE_NAME), TTL)
    }

    #[test]
    fn test_fresh_until_ttl_boundary() {
        let dir = tempdir().unwrap();
        let mut cache = cache_in(dir.path());
        let t = Utc::now();
        cache.put("pwsh", vec!["sha-1".into(), "latest".into()], Some("sha-1".into()), t);

        let just_before = t + chrono::Duration::seconds(299);
        let at_ttl = t + chrono::Duration::seconds(300);

        assert!(cache.get_at("pwsh", t).unwrap().1);
        assert!(cache.get_at("pwsh", just_before).unwrap().1);
        assert!(!cache.get_at("pwsh", at_ttl).unwrap().1);
        assert!(cache.get_at("python", t).is_none());
    }

    #[test]
    fn test_two_minutes_old_is_fresh() {
        let dir = tempdir().unwrap();
        let mut cache = cache_in(dir.path());
        let now = Utc::now();
        cache.put("pwsh", vec!["sha-1".into()], None, now - chrono::Duration::minutes(2));
        assert!(cache.get_at("pwsh", now).unwrap().1);
    }

    #[test]
    fn test_future_timestamp_is_stale() {
        let dir = tempdir().unwrap();
        let mut cache = cache_in(dir.path());
        let now = Utc::now();
        cache.put("pwsh", vec![], None, now + chrono::Duration::hours(1));
        assert!(!cache.get_at("pwsh", now).unwrap().1);
    }

    #[test]
    fn test_put_dedups_preserving_order() {
        let dir = tempdir().unwrap();
        let mut cache = cache_in(dir.path());
        cache.put(
            "pwsh",
            vec!["sha-2".into(), "latest".into(), "sha-2".into(), "sha-1".into()],
            None,
            Utc::now(),
        );
        let (entry, _) = cache.get("pwsh").unwrap();
        assert_eq!(entry.tags, vec!["sha-2", "latest", "sha-1"]);
        assert!(entry.contains_tag("sha-1"));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let mut cache = cache_in(dir.path());
            cache.put("pwsh", vec!["sha-1".into()], Some("sha-1".into()), now);
            cache.put_catalogue(
                vec![CatalogueEntry {
                    name: "pwsh".into(),
                    image_path: "ghcr.io/acme/pwsh".into(),
                }],
                now,
            );
            cache.persist().unwrap();
        }

        let cache = cache_in(dir.path());
        let (entry, fresh) = cache.get_at("pwsh", now).unwrap();
        assert!(fresh);
        assert_eq!(entry.latest_pinned.as_deref(), Some("sha-1"));
        let (catalogue, fresh) = cache.catalogue_at(now).unwrap();
        assert!(fresh);
        assert_eq!(catalogue[0].image_path, "ghcr.io/acme/pwsh");
    }

    #[test]
    fn test_corrupt_file_is_empty_cache() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE_NAME), "{ not json").unwrap();
        let cache = cache_in(dir.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = RegistryCache::load(&dir.path().join("a/b/cache.json"), TTL);
        assert!(cache.is_empty());
        cache.persist().unwrap();
        assert!(dir.path().join("a/b/cache.json").exists());
    }

    #[test]
    fn test_clear_keeps_location() {
        let dir = tempdir().unwrap();
        let mut cache = cache_in(dir.path());
        cache.put("pwsh", vec!["sha-1".into()], None, Utc::now());
        cache.persist().unwrap();

        cache.clear();
        assert!(cache.is_empty());
        cache.persist().unwrap();

        let reloaded = cache_in(dir.path());
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.path(), dir.path().join(CACHE_FILE_NAME));
    }
}
