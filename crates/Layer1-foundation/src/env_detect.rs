//! Environment Detection - 실행 환경 자동 감지
//!
//! CI 여부(strict 모드), 컨테이너 안에서 실행 중인지(nested), 터미널 여부를
//! 한 번 감지해서 명시적으로 전달합니다.

use std::env;
use std::io::IsTerminal;
use std::path::Path;

/// Registry user name
pub const REGISTRY_USER_ENV: &str = "R2R_REGISTRY_USER";
/// Registry token
pub const REGISTRY_TOKEN_ENV: &str = "R2R_REGISTRY_TOKEN";
/// Log filter (falls back to `RUST_LOG`)
pub const LOG_LEVEL_ENV: &str = "R2R_LOG_LEVEL";
/// Config file override
pub const CONFIG_ENV: &str = "R2R_CONFIG";
/// Set by most CI systems
pub const CI_ENV: &str = "CI";

/// Label carried by every container r2r creates
pub const EXTENSION_LABEL: &str = "r2r.extension";
/// Label naming the container that spawned this one
pub const PARENT_LABEL: &str = "r2r.parent";

/// 전체 환경 정보
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Running under CI
    pub ci: bool,
    /// Own container id when running inside a container
    pub container_id: Option<String>,
    pub stdin_is_terminal: bool,
    pub stdout_is_terminal: bool,
}

impl Environment {
    /// 현재 환경 감지
    pub fn detect() -> Self {
        Self {
            ci: env::var(CI_ENV).map(|v| is_truthy(&v)).unwrap_or(false),
            container_id: detect_container_id(),
            stdin_is_terminal: std::io::stdin().is_terminal(),
            stdout_is_terminal: std::io::stdout().is_terminal(),
        }
    }

    /// Running inside another container
    pub fn is_nested(&self) -> bool {
        self.container_id.is_some()
    }
}

/// `1`, `true`, `yes`, `on` (case-insensitive)
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn detect_container_id() -> Option<String> {
    let in_container = Path::new("/.dockerenv").exists()
        || Path::new("/run/.containerenv").exists()
        || std::fs::read_to_string("/proc/1/cgroup")
            .map(|c| cgroup_mentions_container(&c))
            .unwrap_or(false);
    if !in_container {
        return None;
    }

    // Docker sets the hostname to the short container id
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
}

fn cgroup_mentions_container(content: &str) -> bool {
    content
        .lines()
        .any(|l| l.contains("/docker/") || l.contains("/containerd/") || l.contains("kubepods"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        for v in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(is_truthy(v), "{}", v);
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!is_truthy(v), "{}", v);
        }
    }

    #[test]
    fn test_cgroup_detection() {
        assert!(cgroup_mentions_container(
            "12:pids:/docker/0123456789abcdef\n0::/"
        ));
        assert!(!cgroup_mentions_container("0::/user.slice/user-1000.slice"));
    }

    #[test]
    fn test_nested_follows_container_id() {
        let env = Environment {
            container_id: Some("abc123".to_string()),
            ..Default::default()
        };
        assert!(env.is_nested());
        assert!(!Environment::default().is_nested());
    }
}
