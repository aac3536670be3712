//! Per-invocation application context
//!
//! Built once in `main` from the parsed arguments and handed to every command.

use crate::cli::Args;
use r2r_core::ExtensionResolver;
use r2r_foundation::{Environment, ParsedInvocation, R2rConfig, RegistryCache, Result};
use r2r_registry::{GhcrClient, RegistryCredentials};
use r2r_task::container::current_dir_or_dot;
use r2r_task::{ContainerDaemon, DockerDaemon, HostContext, PullCredentials};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub struct AppContext {
    pub invocation: ParsedInvocation,
    pub config: R2rConfig,
    /// Configuration file in use, if any
    pub config_path: Option<PathBuf>,
    pub env: Environment,
    /// Pinned image references required
    pub strict: bool,
    pub working_dir: PathBuf,
}

impl AppContext {
    pub fn load(args: &Args, invocation: ParsedInvocation) -> Result<Self> {
        let working_dir = current_dir_or_dot();
        let (config, config_path) = R2rConfig::load(args.config.as_deref(), &working_dir)?;
        let env = Environment::detect();

        match &config_path {
            Some(path) => debug!("Using configuration {}", path.display()),
            None => debug!("No configuration file found, using defaults"),
        }
        if env.is_nested() {
            debug!("Running nested in container {:?}", env.container_id);
        }

        let strict = strict_mode(args.strict, config.strict, env.ci);
        Ok(Self {
            invocation,
            config,
            config_path,
            env,
            strict,
            working_dir,
        })
    }

    /// Resolver over the on-disk cache and the configured registry
    pub fn resolver(&self) -> Result<ExtensionResolver> {
        let cache = RegistryCache::from_settings(&self.config.cache)?;
        let client = GhcrClient::new(self.config.registry.clone())?;
        Ok(ExtensionResolver::new(cache, Arc::new(client)))
    }

    /// Connected daemon; an unreachable socket fails here, before any work
    pub async fn daemon(&self) -> Result<Arc<dyn ContainerDaemon>> {
        let daemon = DockerDaemon::connect()?;
        daemon.ping().await?;
        debug!("Container daemon reachable");
        Ok(Arc::new(daemon))
    }

    /// Registry credentials for image pulls, when both are set
    pub fn pull_credentials(&self) -> Option<PullCredentials> {
        RegistryCredentials::from_env()
            .ok()
            .map(|creds| PullCredentials {
                username: creds.username,
                password: creds.token,
                server: self.config.registry.host.clone(),
            })
    }

    pub fn host(&self) -> HostContext {
        HostContext {
            working_dir: self.working_dir.clone(),
            parent_container: self.env.container_id.clone(),
            stdin_is_terminal: self.env.stdin_is_terminal,
        }
    }
}

/// `--strict`, `strict: true` in the configuration, or CI
pub fn strict_mode(flag: bool, configured: bool, ci: bool) -> bool {
    flag || configured || ci
}
