//! Docker daemon over bollard

use super::daemon::{
    Attachment, ContainerDaemon, DaemonError, OutputChunk, PullCredentials, WaitHandle,
    WaitOutcome,
};
use super::snapshot::{ContainerInfo, ContainerSnapshot};
use super::spec::ContainerSpec;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const WAIT_CONDITION: &str = "not-running";

/// Container daemon backed by the local Docker socket
#[derive(Clone)]
pub struct DockerDaemon {
    docker: Docker,
}

impl DockerDaemon {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, DaemonError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Fail fast when the daemon does not answer
    pub async fn ping(&self) -> Result<(), DaemonError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DaemonError::Unavailable(e.to_string()))
    }

    fn create_config(spec: &ContainerSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for port in &spec.ports {
            exposed_ports.insert(port.container_key(), HashMap::new());
            port_bindings
                .entry(port.container_key())
                .or_insert_with(|| Some(vec![]))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: Some(port.host_port.to_string()),
                });
        }

        let binds = spec.binds();
        // An empty entrypoint array keeps the image default; [""] clears it
        let entrypoint = spec.entrypoint.as_ref().map(|e| {
            if e.is_empty() {
                vec![String::new()]
            } else {
                e.clone()
            }
        });

        Config {
            image: Some(spec.image.clone()),
            entrypoint,
            cmd: if spec.cmd.is_empty() && spec.entrypoint.is_none() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            env: Some(spec.env_list()),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone().into_iter().collect()),
            tty: Some(spec.tty),
            open_stdin: Some(spec.open_stdin),
            stdin_once: Some(spec.open_stdin),
            attach_stdin: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                // removed explicitly at teardown so a late wait still sees the status
                auto_remove: Some(false),
                network_mode: spec.network.as_docker(),
                memory: spec.limits.memory_bytes,
                nano_cpus: spec.limits.nano_cpus(),
                port_bindings: if port_bindings.is_empty() {
                    None
                } else {
                    Some(port_bindings)
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Map a finished wait stream item to an outcome
fn wait_outcome(
    item: Option<Result<bollard::models::ContainerWaitResponse, BollardError>>,
) -> Result<WaitOutcome, DaemonError> {
    match item {
        Some(Ok(response)) => Ok(WaitOutcome::Completed(response.status_code)),
        // bollard reports non-zero exits as an error carrying the code
        Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
            Ok(WaitOutcome::Completed(code))
        }
        Some(Err(BollardError::DockerResponseServerError {
            status_code: 404, ..
        })) => Ok(WaitOutcome::AlreadyGone),
        Some(Err(e)) => Err(DaemonError::Other(format!("wait failed: {}", e))),
        None => Ok(WaitOutcome::Unknown),
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ContainerDaemon for DockerDaemon {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, DaemonError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), Self::create_config(spec))
            .await
            .map_err(|e| DaemonError::CreateFailed(e.to_string()))?;

        for warning in &response.warnings {
            debug!("create {}: {}", spec.name, warning);
        }
        Ok(response.id)
    }

    async fn attach(&self, id: &str) -> Result<Attachment, DaemonError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| DaemonError::AttachFailed(e.to_string()))?;

        let output = output
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) => {
                        Some(Ok(OutputChunk::Stdout(message.to_vec())))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(OutputChunk::Stderr(message.to_vec())))
                    }
                    Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk::Console(message.to_vec())))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(DaemonError::Other(e.to_string()))),
                }
            })
            .boxed();

        Ok(Attachment { output, input })
    }

    fn wait(&self, id: &str) -> WaitHandle {
        let docker = self.docker.clone();
        let id = id.to_string();
        WaitHandle::from_task(tokio::spawn(async move {
            // not-running answers at once for a container that already exited
            let options = WaitContainerOptions {
                condition: WAIT_CONDITION,
            };
            let mut stream = Box::pin(docker.wait_container(&id, Some(options)));
            wait_outcome(stream.next().await)
        }))
    }

    async fn start(&self, id: &str) -> Result<(), DaemonError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DaemonError::StartFailed(e.to_string()))
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), DaemonError> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // already stopped or already gone
            Err(e) if is_not_modified(&e) || is_not_found(&e) => Ok(()),
            Err(e) => Err(DaemonError::Other(format!("stop failed: {}", e))),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), DaemonError> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()), // not running
            Err(e) => Err(DaemonError::Other(format!("kill failed: {}", e))),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), DaemonError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            // removal already in progress
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(DaemonError::Other(format!("remove failed: {}", e))),
        }
    }

    async fn exit_status(&self, id: &str) -> Result<WaitOutcome, DaemonError> {
        match self.docker.inspect_container(id, None).await {
            Ok(details) => {
                let state = details.state.unwrap_or_default();
                if state.running == Some(true) {
                    return Ok(WaitOutcome::Unknown);
                }
                Ok(state
                    .exit_code
                    .map(WaitOutcome::Completed)
                    .unwrap_or(WaitOutcome::Unknown))
            }
            Err(e) if is_not_found(&e) => Ok(WaitOutcome::AlreadyGone),
            Err(e) => Err(DaemonError::Other(format!("inspect failed: {}", e))),
        }
    }

    async fn snapshot(&self) -> Result<ContainerSnapshot, DaemonError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DaemonError::Other(format!("list failed: {}", e)))?;

        let mut snapshot = ContainerSnapshot::default();
        for summary in containers {
            let Some(id) = summary.id else { continue };
            let name = summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default();
            snapshot.insert(
                id,
                ContainerInfo {
                    name,
                    labels: summary.labels.unwrap_or_default(),
                },
            );
        }
        Ok(snapshot)
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, DaemonError> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(DaemonError::Other(format!("image inspect failed: {}", e))),
        }
    }

    async fn pull(
        &self,
        reference: &str,
        credentials: Option<&PullCredentials>,
    ) -> Result<(), DaemonError> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let credentials = credentials.map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.server.clone()),
            ..Default::default()
        });

        let mut progress = Box::pin(self.docker.create_image(Some(options), None, credentials));
        while let Some(item) = progress.next().await {
            match item {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(
                            "pull {}: {} {}",
                            reference,
                            status,
                            info.progress.unwrap_or_default()
                        );
                    }
                    if let Some(error) = info.error {
                        return Err(DaemonError::PullFailed(error));
                    }
                }
                Err(e) if is_not_found(&e) => {
                    return Err(DaemonError::ImageNotFound(reference.to_string()))
                }
                Err(e) => return Err(DaemonError::PullFailed(e.to_string())),
            }
        }
        Ok(())
    }
}
