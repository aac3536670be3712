//! Container spec
//!
//! Everything the daemon needs to create one session container, derived
//! from an extension definition and the invocation.

use r2r_foundation::config::{parse_port_mapping, PortMapping};
use r2r_foundation::env_detect::{EXTENSION_LABEL, PARENT_LABEL};
use r2r_foundation::{ExtensionDefinition, ImageReference, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Mount point of the host working directory
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// How the container is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Run the payload non-interactively
    Run,
    /// Shell on a terminal
    Interactive,
}

/// Resource limits for container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    /// CPU limit (number of cores, e.g., 1.5)
    pub cpus: Option<f64>,
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
}

impl ResourceLimits {
    /// Docker's `NanoCpus`
    pub fn nano_cpus(&self) -> Option<i64> {
        self.cpus.map(|c| (c * 1_000_000_000.0) as i64)
    }
}

/// Network mode for container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Bridge network (default Docker)
    #[default]
    Bridge,
    /// No network access
    None,
    /// Host network (full access)
    Host,
    /// Custom network
    Custom(String),
}

impl NetworkMode {
    pub fn parse(name: &str) -> Self {
        match name {
            "bridge" | "" => Self::Bridge,
            "none" => Self::None,
            "host" => Self::Host,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Value for `HostConfig.NetworkMode`; `None` keeps the daemon default
    pub fn as_docker(&self) -> Option<String> {
        match self {
            Self::Bridge => None,
            Self::None => Some("none".to_string()),
            Self::Host => Some("host".to_string()),
            Self::Custom(name) => Some(name.clone()),
        }
    }
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Host path
    pub host_path: PathBuf,
    /// Container path
    pub container_path: PathBuf,
    /// Read-only mount
    pub read_only: bool,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Parse `host:container[:ro|rw]`
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, container] => Some(Self::new(*host, *container)),
            [host, container, "ro"] => Some(Self::new(*host, *container).read_only()),
            [host, container, "rw"] => Some(Self::new(*host, *container)),
            _ => None,
        }
    }

    /// Docker bind string
    pub fn to_bind(&self) -> String {
        let ro = if self.read_only { ":ro" } else { "" };
        format!(
            "{}:{}{}",
            self.host_path.to_string_lossy(),
            self.container_path.to_string_lossy(),
            ro
        )
    }
}

/// Host-side facts that shape a ContainerSpec
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub working_dir: PathBuf,
    /// Own container id when nested
    pub parent_container: Option<String>,
    pub stdin_is_terminal: bool,
}

/// Container configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub mode: SessionMode,
    /// `None` keeps the image entrypoint; `Some(vec![])` clears it
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub network: NetworkMode,
    pub limits: ResourceLimits,
    pub labels: BTreeMap<String, String>,
    pub tty: bool,
    pub open_stdin: bool,
}

impl ContainerSpec {
    /// Spec for one session of `def` running `image`
    pub fn for_extension(
        def: &ExtensionDefinition,
        image: &ImageReference,
        mode: SessionMode,
        payload: &[String],
        host: &HostContext,
    ) -> Result<Self> {
        def.validate()?;

        let (entrypoint, cmd, tty, open_stdin) = match mode {
            SessionMode::Run => (None, payload.to_vec(), false, !host.stdin_is_terminal),
            SessionMode::Interactive => {
                (Some(vec![]), vec![def.shell().to_string()], true, true)
            }
        };

        let mut volumes: Vec<VolumeMount> = def
            .volumes
            .iter()
            .filter_map(|v| VolumeMount::parse(v))
            .collect();
        let mut working_dir = def.working_dir.clone();
        if def.mount_workdir {
            volumes.push(VolumeMount::new(&host.working_dir, WORKSPACE_MOUNT));
            if working_dir.is_none() {
                working_dir = Some(WORKSPACE_MOUNT.to_string());
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(EXTENSION_LABEL.to_string(), def.name.clone());
        if let Some(parent) = &host.parent_container {
            labels.insert(PARENT_LABEL.to_string(), parent.clone());
        }

        Ok(Self {
            name: session_name(&def.name),
            image: image.to_string(),
            mode,
            entrypoint,
            cmd,
            env: def.env.clone(),
            working_dir,
            volumes,
            ports: def.ports.iter().filter_map(|p| parse_port_mapping(p)).collect(),
            network: def
                .network
                .as_deref()
                .map(NetworkMode::parse)
                .unwrap_or_default(),
            limits: ResourceLimits {
                cpus: def.cpus,
                memory_bytes: def.memory_bytes(),
            },
            labels,
            tty,
            open_stdin,
        })
    }

    /// `KEY=value` pairs
    pub fn env_list(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    pub fn binds(&self) -> Vec<String> {
        self.volumes.iter().map(VolumeMount::to_bind).collect()
    }
}

/// `r2r-<extension>-<8 hex chars>`
fn session_name(extension: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("r2r-{}-{}", extension, &id[..8])
}

/// Host working directory, falling back to `.`
pub fn current_dir_or_dot() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}
