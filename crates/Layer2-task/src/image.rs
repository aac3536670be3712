//! Image provisioning
//!
//! Makes sure the resolved image exists locally before a container is
//! created, following the extension's pull policy.

use crate::container::{ContainerDaemon, DaemonError, PullCredentials};
use r2r_foundation::{Error, ImageReference, PullPolicy, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ImageProvisioner {
    daemon: Arc<dyn ContainerDaemon>,
    credentials: Option<PullCredentials>,
}

impl ImageProvisioner {
    pub fn new(daemon: Arc<dyn ContainerDaemon>) -> Self {
        Self {
            daemon,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<PullCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Apply `policy` to `reference`; local images are never pulled
    pub async fn ensure_present(
        &self,
        reference: &ImageReference,
        policy: PullPolicy,
        local: bool,
    ) -> Result<()> {
        let image = reference.to_string();
        let policy = if local { PullPolicy::Never } else { policy };

        match policy {
            PullPolicy::Always => self.pull(&image).await,
            PullPolicy::IfNotPresent => {
                if self.exists(&image).await? {
                    debug!("Image {} present locally", image);
                    Ok(())
                } else {
                    self.pull(&image).await
                }
            }
            PullPolicy::Never => {
                if self.exists(&image).await? {
                    Ok(())
                } else {
                    Err(Error::image_unavailable(
                        &image,
                        "not present locally and pulling is disabled",
                    ))
                }
            }
        }
    }

    async fn exists(&self, image: &str) -> Result<bool> {
        self.daemon
            .image_exists(image)
            .await
            .map_err(|e| Error::Daemon(e.to_string()))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!("Pulling {}", image);
        self.daemon
            .pull(image, self.credentials.as_ref())
            .await
            .map_err(|e| match e {
                DaemonError::Unavailable(msg) => Error::Daemon(msg),
                other => Error::image_unavailable(image, other.to_string()),
            })
    }
}
