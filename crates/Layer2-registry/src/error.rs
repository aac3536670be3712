//! Registry-specific error types
//!
//! RegistryError는 레지스트리 호출의 세부 에러를 관리합니다.
//! r2r_foundation::Error와의 변환을 지원합니다.

use crate::retry::{RetryClassification, RetryableError};
use r2r_foundation::Error as FoundationError;
use thiserror::Error;

/// Errors that can occur while talking to the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Credential variables are not set
    #[error("Credentials missing: {}", .0.join(", "))]
    CredentialsMissing(Vec<String>),

    /// Token rejected (401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Package or organization does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded{}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    /// Network failure or server error (5xx)
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    /// Body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Registry settings incomplete
    #[error("Registry not configured: {0}")]
    NotConfigured(String),
}

impl RetryableError for RegistryError {
    fn classify(&self) -> RetryClassification {
        match self {
            RegistryError::RateLimited { retry_after_ms } => RetryClassification::RateLimited {
                retry_after_ms: *retry_after_ms,
            },

            // Network issues and 5xx - retry
            RegistryError::Unreachable(_) => RetryClassification::Retry,

            RegistryError::CredentialsMissing(_)
            | RegistryError::Authentication(_)
            | RegistryError::NotFound(_)
            | RegistryError::InvalidResponse(_)
            | RegistryError::NotConfigured(_) => RetryClassification::NoRetry,
        }
    }
}

impl RegistryError {
    /// Create from HTTP status code and body
    pub fn from_http_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => {
                if body.contains("rate limit") {
                    RegistryError::RateLimited {
                        retry_after_ms: None,
                    }
                } else {
                    RegistryError::Authentication(body.to_string())
                }
            }
            404 => RegistryError::NotFound(body.to_string()),
            429 => RegistryError::RateLimited {
                retry_after_ms: None,
            },
            500..=599 => RegistryError::Unreachable(format!("HTTP {}: {}", status, body)),
            _ => RegistryError::InvalidResponse(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Map a transport failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::InvalidResponse(err.to_string())
        } else {
            RegistryError::Unreachable(err.to_string())
        }
    }
}

// ============================================================================
// r2r_foundation::Error 변환
// ============================================================================

impl From<RegistryError> for FoundationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CredentialsMissing(vars) => FoundationError::CredentialsMissing(vars),
            RegistryError::Authentication(msg) => FoundationError::RegistryAuth(msg),
            RegistryError::NotFound(what) => FoundationError::ExtensionNotFound(what),
            RegistryError::RateLimited { .. } => {
                FoundationError::RegistryUnreachable("rate limited".to_string())
            }
            RegistryError::Unreachable(msg) => FoundationError::RegistryUnreachable(msg),
            RegistryError::InvalidResponse(msg) => {
                FoundationError::RegistryUnreachable(format!("invalid response: {}", msg))
            }
            RegistryError::NotConfigured(msg) => FoundationError::Config(msg),
        }
    }
}
