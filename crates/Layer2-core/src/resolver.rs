//! Extension resolver
//!
//! Turns a configured extension into the image reference that will run.
//!
//! ```text
//! load_local ───────────────────────────────▶ Local
//! sha-… / @digest ──────────────────────────▶ Pinned
//! mutable + strict ──▶ lookup (suggestion) ─▶ PolicyViolation
//! mutable ───────────▶ lookup ──ok─────────▶ Discovered
//!                               └─fail─────▶ Mutable (warn)
//! ```
//!
//! Lookup is cache-then-client: a fresh cache entry answers without touching
//! the registry, otherwise exactly one `list_tags` call refreshes the entry.

use chrono::{DateTime, Utc};
use r2r_foundation::{
    CacheEntry, CatalogueEntry, Error, ExtensionDefinition, ImageReference, PolicyViolation,
    RegistryCache, Result,
};
use r2r_registry::RegistryClient;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Resolution
// ============================================================================

/// How a resolution was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Configured reference was already content-addressed
    Pinned,
    /// Mutable tag replaced by the latest content-addressed tag
    Discovered,
    /// Lookup failed; the mutable reference is used as-is
    Mutable,
    /// Pre-built local image
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub extension: String,
    pub reference: ImageReference,
    pub source: ResolutionSource,
}

impl Resolution {
    /// Local images must never be pulled
    pub fn is_local(&self) -> bool {
        self.source == ResolutionSource::Local
    }
}

/// Tag information shown by `list --tags`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReport {
    pub extension: String,
    pub tags: Vec<String>,
    pub latest_pinned: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Served from a stale entry because the registry was unreachable
    pub stale: bool,
}

impl From<(&CacheEntry, bool)> for TagReport {
    fn from((entry, stale): (&CacheEntry, bool)) -> Self {
        Self {
            extension: entry.extension_name.clone(),
            tags: entry.tags.clone(),
            latest_pinned: entry.latest_pinned.clone(),
            fetched_at: entry.fetched_at,
            stale,
        }
    }
}

// ============================================================================
// ExtensionResolver
// ============================================================================

pub struct ExtensionResolver {
    cache: RegistryCache,
    client: Arc<dyn RegistryClient>,
}

impl ExtensionResolver {
    pub fn new(cache: RegistryCache, client: Arc<dyn RegistryClient>) -> Self {
        Self { cache, client }
    }

    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Drop all cached registry data and write the empty cache
    pub fn clear_cache(&mut self) -> Result<()> {
        self.cache.clear();
        self.cache.persist()?;
        info!("Registry cache cleared: {}", self.cache.path().display());
        Ok(())
    }

    /// Resolve one extension under the pinning policy
    pub async fn resolve(&mut self, def: &ExtensionDefinition, strict: bool) -> Result<Resolution> {
        let reference = def.image_reference()?;

        if def.load_local {
            debug!("{}: using local image {}", def.name, reference);
            return Ok(Resolution {
                extension: def.name.clone(),
                reference,
                source: ResolutionSource::Local,
            });
        }

        if reference.is_content_addressed() {
            return Ok(Resolution {
                extension: def.name.clone(),
                reference,
                source: ResolutionSource::Pinned,
            });
        }

        if strict {
            let suggestion = match self.latest_pinned(def, &reference, false).await {
                Ok(tag) => Some(reference.with_tag(tag).to_string()),
                Err(e) => {
                    debug!("{}: no pinned suggestion: {}", def.name, e);
                    None
                }
            };
            return Err(Error::policy_violation(
                &def.name,
                reference.to_string(),
                suggestion,
            ));
        }

        match self.latest_pinned(def, &reference, false).await {
            Ok(tag) => {
                let pinned = reference.with_tag(tag);
                info!("{}: {} resolved to {}", def.name, reference, pinned);
                Ok(Resolution {
                    extension: def.name.clone(),
                    reference: pinned,
                    source: ResolutionSource::Discovered,
                })
            }
            Err(e) => {
                warn!(
                    "{}: could not discover a pinned tag ({}); using mutable image {}",
                    def.name, e, reference
                );
                Ok(Resolution {
                    extension: def.name.clone(),
                    reference,
                    source: ResolutionSource::Mutable,
                })
            }
        }
    }

    /// Resolve every definition, reporting all policy violations together
    pub async fn validate_all(
        &mut self,
        defs: &[ExtensionDefinition],
        strict: bool,
    ) -> Result<Vec<Resolution>> {
        let mut resolutions = Vec::with_capacity(defs.len());
        let mut violations: Vec<PolicyViolation> = vec![];

        for def in defs {
            match self.resolve(def, strict).await {
                Ok(resolution) => resolutions.push(resolution),
                Err(Error::PolicyViolation(found)) => violations.extend(found),
                Err(e) => return Err(e),
            }
        }

        if violations.is_empty() {
            Ok(resolutions)
        } else {
            Err(Error::PolicyViolation(violations))
        }
    }

    /// Tags of one extension, refreshing through the registry when needed
    pub async fn tags(&mut self, def: &ExtensionDefinition, refresh: bool) -> Result<TagReport> {
        let reference = def.image_reference()?;
        let stale = self.lookup_entry(def, &reference, refresh).await?;
        self.cache
            .get(&def.name)
            .map(|(entry, _)| TagReport::from((entry, stale)))
            .ok_or_else(|| Error::ExtensionNotFound(def.name.clone()))
    }

    /// Catalogue as last cached, with its freshness; never consults the registry
    pub fn cached_catalogue(&self) -> Option<(Vec<CatalogueEntry>, bool)> {
        self.cache.catalogue_at(Utc::now()).map(|(entries, fresh)| {
            debug!("Catalogue served from cache ({} extensions)", entries.len());
            (entries.to_vec(), fresh)
        })
    }

    /// Extensions published in the registry, fetched now
    pub async fn refresh_catalogue(&mut self) -> Result<Vec<CatalogueEntry>> {
        let now = Utc::now();
        match self.client.list_extensions().await.map_err(Error::from) {
            Ok(entries) => {
                self.cache.put_catalogue(entries.clone(), Utc::now());
                self.persist_cache();
                Ok(entries)
            }
            Err(Error::RegistryUnreachable(msg)) => match self.cache.catalogue_at(now) {
                Some((entries, _)) => {
                    warn!("Registry unreachable ({}); using cached catalogue", msg);
                    Ok(entries.to_vec())
                }
                None => Err(Error::RegistryUnreachable(msg)),
            },
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Latest content-addressed tag for `def`
    async fn latest_pinned(
        &mut self,
        def: &ExtensionDefinition,
        reference: &ImageReference,
        refresh: bool,
    ) -> Result<String> {
        self.lookup_entry(def, reference, refresh).await?;
        self.cache
            .get(&def.name)
            .and_then(|(entry, _)| entry.latest_pinned.clone())
            .ok_or_else(|| Error::NoPinnedTag(def.name.clone()))
    }

    /// Make sure the cache holds an entry for `def`
    ///
    /// Returns whether the entry in the cache is a stale fallback.
    async fn lookup_entry(
        &mut self,
        def: &ExtensionDefinition,
        reference: &ImageReference,
        refresh: bool,
    ) -> Result<bool> {
        let has_stale = match self.cache.get_at(&def.name, Utc::now()) {
            Some((_, true)) if !refresh => {
                debug!("{}: registry cache hit", def.name);
                return Ok(false);
            }
            Some(_) => true,
            None => false,
        };

        debug!("{}: querying registry for {}", def.name, reference.registry_path());
        match self
            .client
            .list_tags(reference.registry_path())
            .await
            .map_err(Error::from)
        {
            Ok(listing) => {
                self.cache
                    .put(&def.name, listing.tags, listing.latest_pinned, Utc::now());
                self.persist_cache();
                Ok(false)
            }
            Err(Error::RegistryUnreachable(msg)) if has_stale => {
                warn!(
                    "{}: registry unreachable ({}); using stale cached tags",
                    def.name, msg
                );
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Write failures are logged, not returned
    fn persist_cache(&self) {
        if let Err(e) = self.cache.persist() {
            warn!(
                "Failed to write registry cache {}: {}",
                self.cache.path().display(),
                e
            );
        }
    }
}
