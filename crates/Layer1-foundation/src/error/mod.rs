//! Error types for r2r
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for failures that happen before (or while) a container is set up
pub const EXIT_FAILURE: i32 = 1;

/// r2r 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown extension '{0}' (not present in the configuration)")]
    UnknownExtension(String),

    // ========================================================================
    // 정책 관련
    // ========================================================================
    /// A mutable image reference was used where a pinned one is required
    #[error("{}", format_policy_violations(.0))]
    PolicyViolation(Vec<PolicyViolation>),

    // ========================================================================
    // 레지스트리 관련
    // ========================================================================
    #[error("Registry credentials missing: set {}", .0.join(" and "))]
    CredentialsMissing(Vec<String>),

    #[error("Registry unreachable: {0}")]
    RegistryUnreachable(String),

    #[error("Registry authentication failed: {0}")]
    RegistryAuth(String),

    #[error("Extension '{0}' not found in registry")]
    ExtensionNotFound(String),

    #[error("Extension '{0}' has no content-addressed tag in the registry")]
    NoPinnedTag(String),

    // ========================================================================
    // 컨테이너 관련
    // ========================================================================
    #[error("Image unavailable: {image} - {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("Container daemon error: {0}")]
    Daemon(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One extension that failed the pinning policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub extension: String,
    pub image: String,
    /// Best-known content-addressed replacement, if one could be discovered
    pub suggestion: Option<String>,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "extension '{}' uses mutable image '{}'",
            self.extension, self.image
        )?;
        match &self.suggestion {
            Some(pinned) => write!(f, " (pin it to '{}')", pinned),
            None => write!(f, " (no content-addressed replacement found)"),
        }
    }
}

fn format_policy_violations(violations: &[PolicyViolation]) -> String {
    let details: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
    format!(
        "Policy violation: strict mode requires pinned images; {}",
        details.join("; ")
    )
}

impl Error {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }

    /// Actionable hint shown under the error message, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::CredentialsMissing(_) => Some(
                "export R2R_REGISTRY_USER and R2R_REGISTRY_TOKEN (a token with read:packages scope)",
            ),
            Error::PolicyViolation(_) => {
                Some("pin each extension to a sha- tag in the configuration file")
            }
            Error::RegistryAuth(_) => Some("check that R2R_REGISTRY_TOKEN is valid and not expired"),
            Error::UnknownExtension(_) => Some("run `r2r list` to see configured extensions"),
            Error::Daemon(_) => Some("is the Docker daemon running and reachable?"),
            _ => None,
        }
    }

    /// 단일 정책 위반 에러 생성 헬퍼
    pub fn policy_violation(
        extension: impl Into<String>,
        image: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        Error::PolicyViolation(vec![PolicyViolation {
            extension: extension.into(),
            image: image.into(),
            suggestion,
        }])
    }

    /// 이미지 에러 생성 헬퍼
    pub fn image_unavailable(image: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ImageUnavailable {
            image: image.into(),
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
