//! Image references and pull policy

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tag prefix of content-addressed (immutable) tags published by the build
pub const PINNED_TAG_PREFIX: &str = "sha-";

/// Tag assumed when a reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// When to pull an extension image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PullPolicy {
    /// Pull before every run
    #[serde(alias = "always")]
    Always,
    /// Pull only if the image is missing locally
    #[default]
    #[serde(alias = "if-not-present", alias = "ifnotpresent")]
    IfNotPresent,
    /// Never pull; the image must already exist
    #[serde(alias = "never")]
    Never,
}

impl std::fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        };
        f.write_str(name)
    }
}

/// A parsed image reference: `registry/path[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry_path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference such as `ghcr.io/acme/pwsh:sha-1a2b3c`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() || input.chars().any(char::is_whitespace) {
            return Err(Error::InvalidReference(input.to_string()));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) if !digest.is_empty() && digest.contains(':') => {
                (name, Some(digest.to_string()))
            }
            Some(_) => return Err(Error::InvalidReference(input.to_string())),
            None => (input, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are registry ports.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        if path.is_empty() || path.ends_with('/') || tag.as_deref() == Some("") {
            return Err(Error::InvalidReference(input.to_string()));
        }

        Ok(Self {
            registry_path: path.to_string(),
            tag,
            digest,
        })
    }

    pub fn registry_path(&self) -> &str {
        &self.registry_path
    }

    /// Tag, defaulting to `latest`
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Content-addressed references never change once published
    pub fn is_content_addressed(&self) -> bool {
        self.digest.is_some() || is_pinned_tag(self.tag())
    }

    /// Same repository, different tag
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry_path: self.registry_path.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.registry_path)?;
        match (&self.tag, &self.digest) {
            (Some(tag), Some(digest)) => write!(f, ":{}@{}", tag, digest),
            (None, Some(digest)) => write!(f, "@{}", digest),
            (Some(tag), None) => write!(f, ":{}", tag),
            (None, None) => write!(f, ":{}", DEFAULT_TAG),
        }
    }
}

impl std::str::FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether a bare tag is content-addressed
pub fn is_pinned_tag(tag: &str) -> bool {
    tag.len() > PINNED_TAG_PREFIX.len() && tag.starts_with(PINNED_TAG_PREFIX)
}
