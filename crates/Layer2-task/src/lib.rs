//! # r2r-task
//!
//! Container execution for r2r.
//! Provisions images and runs one extension container per invocation.
//!
//! ## Features
//!
//! - Image provisioning by pull policy
//! - Attach / wait registered before start (no lost output on instant exit)
//! - Signal-driven graceful stop with kill fallback
//! - Exit-race tolerant wait (`WaitOutcome`)
//! - Leaked container detection

pub mod container;
pub mod image;

// Container system
pub use container::{
    ContainerDaemon, ContainerSession, ContainerSpec, DaemonError, DockerDaemon, HostContext,
    InterruptSource, OutputSinks, PullCredentials, SessionIo, SessionMode, SessionOptions,
    SessionReport, WaitOutcome, EXIT_INTERRUPTED,
};

// Image system
pub use image::ImageProvisioner;
