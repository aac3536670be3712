//! r2r 통합 설정
//!
//! ## 검색 우선순위
//!
//! 1. `--config <path>` (명시적)
//! 2. `R2R_CONFIG` 환경 변수
//! 3. Project-level: `.r2r/config.yaml`
//! 4. User-level: `<config dir>/r2r/config.yaml`
//!
//! 처음 발견된 파일 하나만 사용합니다. 파일이 없으면 기본값.

use super::extension::ExtensionDefinition;
use crate::env_detect::CONFIG_ENV;
use crate::storage::APP_DIR_NAME;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// 설정 파일명
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// 프로젝트 설정 폴더 이름
pub const PROJECT_DIR_NAME: &str = ".r2r";

// ============================================================================
// R2rConfig
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct R2rConfig {
    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub session: SessionSettings,

    /// Require pinned images even outside CI
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub extensions: Vec<ExtensionDefinition>,
}

/// Registry access settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Image registry host (image paths are `{host}/{organization}/{package}`)
    #[serde(default = "default_registry_host")]
    pub host: String,

    #[serde(default)]
    pub organization: String,

    /// Base URL of the packages API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Only packages whose name starts with this prefix are extensions
    #[serde(default)]
    pub package_prefix: String,
}

/// Registry cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Override for the cache file location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Container session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Graceful stop window before the container is killed
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_registry_host() -> String {
    "ghcr.io".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_ttl_secs() -> u64 {
    300
} // 5 minutes
fn default_stop_timeout_secs() -> u64 {
    10
}

/// Longest accepted graceful stop window (one hour)
const MAX_STOP_TIMEOUT_SECS: u64 = 3600;

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: default_registry_host(),
            organization: String::new(),
            api_url: default_api_url(),
            package_prefix: String::new(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            path: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl SessionSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl R2rConfig {
    /// Parse and validate YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: R2rConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load one file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Locate and load the configuration; returns the file used, if any
    pub fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            // An explicit path must exist
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                let path = PathBuf::from(path);
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        for path in search_paths(working_dir) {
            if path.is_file() {
                info!("Loading configuration from {}", path.display());
                return Ok((Self::from_file(&path)?, Some(path)));
            }
            debug!("No configuration at {}", path.display());
        }

        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            return Err(Error::Config("cache.ttl_secs must be > 0".to_string()));
        }
        if self.session.stop_timeout_secs == 0 {
            return Err(Error::Config(
                "session.stop_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.session.stop_timeout_secs > MAX_STOP_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "session.stop_timeout_secs must be at most {}",
                MAX_STOP_TIMEOUT_SECS
            )));
        }

        let mut seen = HashSet::new();
        for ext in &self.extensions {
            ext.validate()?;
            if !seen.insert(ext.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate extension name '{}'",
                    ext.name
                )));
            }
        }
        Ok(())
    }

    pub fn extension(&self, name: &str) -> Result<&ExtensionDefinition> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::UnknownExtension(name.to_string()))
    }
}

/// Candidate config files, highest priority first
pub fn search_paths(working_dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![working_dir.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths
}
