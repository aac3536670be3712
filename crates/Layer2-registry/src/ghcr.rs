//! GitHub Container Registry client
//!
//! Extensions are container packages of one organization. Discovery goes
//! through the GitHub packages API:
//!
//! - `GET /orgs/{org}/packages?package_type=container`
//! - `GET /orgs/{org}/packages/container/{package}/versions`
//!
//! Every version carries its `created_at` and its tags; the newest version
//! holding a `sha-` tag defines the latest content-addressed tag.

use crate::client::{RegistryClient, RegistryCredentials, TagListing};
use crate::error::RegistryError;
use crate::retry::{with_retry, RetryConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2r_foundation::config::is_pinned_tag;
use r2r_foundation::{CatalogueEntry, RegistrySettings};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PER_PAGE: usize = 100;
/// Upper bound on pages fetched per listing; a longer listing is an error
const MAX_PAGES: usize = 20;
const API_VERSION: &str = "2022-11-28";

// ============================================================================
// API types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PackageRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionRecord {
    created_at: DateTime<Utc>,
    #[serde(default)]
    metadata: Option<VersionMetadata>,
}

#[derive(Debug, Deserialize)]
struct VersionMetadata {
    #[serde(default)]
    container: Option<ContainerMetadata>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

impl VersionRecord {
    fn tags(&self) -> &[String] {
        self.metadata
            .as_ref()
            .and_then(|m| m.container.as_ref())
            .map(|c| c.tags.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// GhcrClient
// ============================================================================

pub struct GhcrClient {
    client: Client,
    settings: RegistrySettings,
    credentials: Result<RegistryCredentials, RegistryError>,
    retry: RetryConfig,
}

impl GhcrClient {
    /// Client with credentials taken from the environment
    ///
    /// Missing credentials are reported on the first call, not here, so a
    /// fresh cache never needs them.
    pub fn new(settings: RegistrySettings) -> Result<Self, RegistryError> {
        Self::with_credentials(settings, RegistryCredentials::from_env())
    }

    pub fn with_credentials(
        settings: RegistrySettings,
        credentials: Result<RegistryCredentials, RegistryError>,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("r2r/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            credentials,
            retry: RetryConfig::default(),
        })
    }

    fn credentials(&self) -> Result<&RegistryCredentials, RegistryError> {
        self.credentials.as_ref().map_err(Clone::clone)
    }

    fn organization(&self) -> Result<&str, RegistryError> {
        if self.settings.organization.is_empty() {
            return Err(RegistryError::NotConfigured(
                "registry.organization is not set".to_string(),
            ));
        }
        Ok(&self.settings.organization)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    /// Fetch every page of a listing endpoint
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        extra_query: &[(&str, &str)],
    ) -> Result<Vec<T>, RegistryError> {
        let credentials = self.credentials()?;
        let mut all = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_str = page.to_string();
            let per_page = PER_PAGE.to_string();
            let items: Vec<T> = with_retry(&self.retry, "registry request", || async {
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(&credentials.token)
                    .header("Accept", "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", API_VERSION)
                    .query(extra_query)
                    .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())])
                    .send()
                    .await
                    .map_err(|e| RegistryError::from_transport(&e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RegistryError::from_http_status(status.as_u16(), &body));
                }

                response
                    .json::<Vec<T>>()
                    .await
                    .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
            })
            .await?;

            let last_page = items.len() < PER_PAGE;
            all.extend(items);
            if last_page {
                return Ok(all);
            }
        }

        Err(RegistryError::InvalidResponse(format!(
            "{} returned more than {} pages of {} results",
            url, MAX_PAGES, PER_PAGE
        )))
    }

    /// Package name for an image path under this organization
    fn package_for(&self, image_path: &str) -> Result<String, RegistryError> {
        let org = self.organization()?;
        let prefix = format!("{}/{}/", self.settings.host, org);
        image_path
            .strip_prefix(&prefix)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "{} is not hosted under {}",
                    image_path,
                    prefix.trim_end_matches('/')
                ))
            })
    }
}

#[async_trait]
impl RegistryClient for GhcrClient {
    async fn list_extensions(&self) -> Result<Vec<CatalogueEntry>, RegistryError> {
        let org = self.organization()?;
        let url = self.api_url(&format!("/orgs/{}/packages", org));
        info!("Listing extensions for {}", org);

        let packages: Vec<PackageRecord> = self
            .get_all_pages(&url, &[("package_type", "container")])
            .await
            .map_err(|e| match e {
                RegistryError::NotFound(_) => {
                    RegistryError::NotFound(format!("organization '{}'", org))
                }
                other => other,
            })?;

        Ok(catalogue_from_packages(
            packages.into_iter().map(|p| p.name),
            &self.settings,
        ))
    }

    async fn list_tags(&self, image_path: &str) -> Result<TagListing, RegistryError> {
        let org = self.organization()?;
        let package = self.package_for(image_path)?;
        let url = self.api_url(&format!(
            "/orgs/{}/packages/container/{}/versions",
            org,
            urlencoding::encode(&package)
        ));
        debug!("Listing tags for {}", image_path);

        let versions: Vec<VersionRecord> = self
            .get_all_pages(&url, &[])
            .await
            .map_err(|e| match e {
                RegistryError::NotFound(_) => RegistryError::NotFound(package.clone()),
                other => other,
            })?;

        Ok(tag_listing_from_versions(&versions))
    }
}

/// Catalogue entries for the packages under the configured prefix
fn catalogue_from_packages(
    names: impl Iterator<Item = String>,
    settings: &RegistrySettings,
) -> Vec<CatalogueEntry> {
    let mut entries: Vec<CatalogueEntry> = names
        .filter(|name| name.starts_with(&settings.package_prefix))
        .map(|package| {
            let short = package
                .strip_prefix(&settings.package_prefix)
                .unwrap_or(&package)
                .rsplit('/')
                .next()
                .unwrap_or(&package)
                .to_string();
            CatalogueEntry {
                name: short,
                image_path: format!(
                    "{}/{}/{}",
                    settings.host, settings.organization, package
                ),
            }
        })
        .filter(|e| !e.name.is_empty())
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Flatten tags in registry order and pick the newest pinned tag by `created_at`
fn tag_listing_from_versions(versions: &[VersionRecord]) -> TagListing {
    let tags = versions
        .iter()
        .flat_map(|v| v.tags().iter().cloned())
        .collect();

    let latest_pinned = versions
        .iter()
        .filter_map(|v| {
            v.tags()
                .iter()
                .find(|t| is_pinned_tag(t))
                .map(|t| (v.created_at, t))
        })
        .max_by_key(|(created_at, _)| *created_at)
        .map(|(_, tag)| tag.clone());

    TagListing {
        tags,
        latest_pinned,
    }
}
