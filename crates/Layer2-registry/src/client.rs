//! Registry client abstraction

use crate::error::RegistryError;
use async_trait::async_trait;
use r2r_foundation::env_detect::{REGISTRY_TOKEN_ENV, REGISTRY_USER_ENV};
use r2r_foundation::CatalogueEntry;

/// Tags of one image, in registry order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagListing {
    pub tags: Vec<String>,
    /// Content-addressed tag of the most recently produced version
    pub latest_pinned: Option<String>,
}

/// Remote source of extensions and tags
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Extensions published in the registry
    async fn list_extensions(&self) -> Result<Vec<CatalogueEntry>, RegistryError>;

    /// Tags of the image at `image_path` (`ghcr.io/acme/pwsh`)
    async fn list_tags(&self, image_path: &str) -> Result<TagListing, RegistryError>;
}

/// Registry login
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

impl RegistryCredentials {
    /// Read `R2R_REGISTRY_USER` / `R2R_REGISTRY_TOKEN`
    pub fn from_env() -> Result<Self, RegistryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`; names every missing variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let username = read(REGISTRY_USER_ENV);
        let token = read(REGISTRY_TOKEN_ENV);

        match (username, token) {
            (Some(username), Some(token)) => Ok(Self { username, token }),
            (username, token) => {
                let mut missing = vec![];
                if username.is_none() {
                    missing.push(REGISTRY_USER_ENV.to_string());
                }
                if token.is_none() {
                    missing.push(REGISTRY_TOKEN_ENV.to_string());
                }
                Err(RegistryError::CredentialsMissing(missing))
            }
        }
    }
}
