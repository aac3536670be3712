//! Extension definitions
//!
//! One entry of the `extensions:` list in the configuration file. The core
//! only reads these; the container-level fields are passed through to the
//! orchestrator when it builds the container spec.

use super::image::{ImageReference, PullPolicy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interactive shell used when an extension does not name one
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// A named, container-packaged tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDefinition {
    pub name: String,

    /// Image reference as written in the configuration
    pub image: String,

    #[serde(default, rename = "image_pull_policy")]
    pub pull_policy: PullPolicy,

    /// Use a pre-built local image; never consult the registry
    #[serde(default)]
    pub load_local: bool,

    /// Remove containers spawned by this extension's container on exit
    #[serde(default)]
    pub auto_remove_children: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// `host:container[:ro|rw]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// `[ip:]host:container[/proto]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Bind the host working directory at `/workspace`
    #[serde(default)]
    pub mount_workdir: bool,

    /// Memory limit, e.g. `512m`, `2g`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Remove ANSI escape sequences from container output
    #[serde(default)]
    pub strip_ansi: bool,
}

impl ExtensionDefinition {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            pull_policy: PullPolicy::default(),
            load_local: false,
            auto_remove_children: false,
            description: None,
            env: BTreeMap::new(),
            volumes: vec![],
            ports: vec![],
            network: None,
            working_dir: None,
            mount_workdir: false,
            memory: None,
            cpus: None,
            shell: None,
            strip_ansi: false,
        }
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_load_local(mut self, load_local: bool) -> Self {
        self.load_local = load_local;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Parsed image reference
    pub fn image_reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.image).map_err(|_| {
            Error::Config(format!(
                "extension '{}': invalid image reference '{}'",
                self.name, self.image
            ))
        })
    }

    /// Interactive shell
    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    /// Memory limit in bytes
    pub fn memory_bytes(&self) -> Option<i64> {
        self.memory.as_deref().and_then(parse_memory_bytes)
    }

    /// Check the fields the orchestrator relies on
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("extension '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(Error::Config("extension with empty name".to_string()));
        }
        if self.name.chars().any(|c| c.is_whitespace() || c == '/') {
            return fail("name must not contain whitespace or '/'".to_string());
        }
        self.image_reference()?;

        for volume in &self.volumes {
            if !is_valid_volume(volume) {
                return fail(format!("invalid volume '{}'", volume));
            }
        }
        for port in &self.ports {
            if parse_port_mapping(port).is_none() {
                return fail(format!("invalid port mapping '{}'", port));
            }
        }
        if let Some(memory) = &self.memory {
            if parse_memory_bytes(memory).is_none() {
                return fail(format!("invalid memory limit '{}'", memory));
            }
        }
        if let Some(cpus) = self.cpus {
            if !(cpus > 0.0) {
                return fail(format!("cpus must be positive, got {}", cpus));
            }
        }
        Ok(())
    }
}

/// Port mapping parsed from `[ip:]host:container[/proto]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
}

impl PortMapping {
    /// Docker's `80/tcp` key
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

pub fn parse_port_mapping(spec: &str) -> Option<PortMapping> {
    let (ports, protocol) = match spec.split_once('/') {
        Some((ports, proto)) if proto == "tcp" || proto == "udp" => (ports, proto),
        Some(_) => return None,
        None => (spec, "tcp"),
    };

    let parts: Vec<&str> = ports.split(':').collect();
    let (host_ip, host, container) = match parts.as_slice() {
        [host, container] => (None, *host, *container),
        [ip, host, container] if !ip.is_empty() => (Some(ip.to_string()), *host, *container),
        _ => return None,
    };

    Some(PortMapping {
        host_ip,
        host_port: host.parse().ok()?,
        container_port: container.parse().ok()?,
        protocol: protocol.to_string(),
    })
}

fn is_valid_volume(spec: &str) -> bool {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [host, container] => !host.is_empty() && container.starts_with('/'),
        [host, container, mode] => {
            !host.is_empty() && container.starts_with('/') && (*mode == "ro" || *mode == "rw")
        }
        _ => false,
    }
}

/// Parse `512m`, `2g`, `1024k` or a plain byte count
pub fn parse_memory_bytes(spec: &str) -> Option<i64> {
    let spec = spec.trim().to_ascii_lowercase();
    let spec = spec.strip_suffix('b').unwrap_or(&spec);
    let (digits, multiplier) = match spec.chars().last()? {
        'k' => (&spec[..spec.len() - 1], 1024),
        'm' => (&spec[..spec.len() - 1], 1024 * 1024),
        'g' => (&spec[..spec.len() - 1], 1024 * 1024 * 1024),
        _ => (spec, 1),
    };
    let value: i64 = digits.parse().ok()?;
    if value <= 0 {
        return None;
    }
    value.checked_mul(multiplier)
}
