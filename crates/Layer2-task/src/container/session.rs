//! Container session orchestration
//!
//! One foreground container per invocation:
//!
//! ```text
//! create ─▶ attach ─▶ wait registered ─▶ snapshot ─▶ start
//!                                                      │
//!        ┌──────────── SessionEvent channel ◀──────────┤
//!        │  OutputDrained  (output task)               │
//!        │  Exited         (wait task)                 │
//!        │  Interrupted    (signal task)               │
//!        ▼                                             │
//!   loop until Exited + OutputDrained ─▶ snapshot ─▶ remove
//! ```
//!
//! Attach, wait and the interrupt listener are registered before start, so a
//! container that exits immediately still delivers all of its output and its
//! status. The container is never auto-removed by the daemon: its status stays
//! inspectable until the session removes it.

use super::daemon::{ContainerDaemon, WaitOutcome};
use super::snapshot::ContainerSnapshot;
use super::spec::{ContainerSpec, SessionMode};
use super::stream::{forward_input, pump_output, OutputSinks, StreamOptions};
use r2r_foundation::Result;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Conventional status for a process ended by SIGINT
pub const EXIT_INTERRUPTED: i32 = 130;

/// Extra time the loop waits for the exit after the stop timeout
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Delay before asking the daemon directly when output ended but no exit was reported
const EXIT_PROBE_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// Options / IO
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Graceful stop window before the container is killed
    pub stop_timeout: Duration,
    /// r2r itself runs inside a container
    pub nested: bool,
    /// Remove containers the session container spawned
    pub auto_remove_children: bool,
    pub strip_ansi: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            nested: false,
            auto_remove_children: false,
            strip_ansi: false,
        }
    }
}

/// Where interrupts come from
pub enum InterruptSource {
    /// SIGINT / SIGTERM of this process
    Os,
    /// Each message is one interrupt
    Channel(mpsc::Receiver<()>),
}

/// Host side of a session
pub struct SessionIo {
    pub sinks: OutputSinks,
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub interrupts: InterruptSource,
}

impl SessionIo {
    /// The process's own stdio and signals
    pub fn host() -> Self {
        Self {
            sinks: OutputSinks::host(),
            stdin: Some(Box::new(tokio::io::stdin())),
            interrupts: InterruptSource::Os,
        }
    }
}

/// What happened in a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub container_id: String,
    pub exit_code: i32,
    /// `None` when interrupted and the exit was never observed
    pub outcome: Option<WaitOutcome>,
    pub interrupted: bool,
    /// `(id, name)` of containers left behind
    pub leaked: Vec<(String, String)>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug)]
enum SessionEvent {
    Exited(std::result::Result<WaitOutcome, super::daemon::DaemonError>),
    OutputDrained(io::Result<()>),
    Interrupted,
}

/// Aborts every task still running when the session ends
#[derive(Default)]
struct SessionTasks(Vec<JoinHandle<()>>);

impl SessionTasks {
    fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

// ============================================================================
// ContainerSession
// ============================================================================

pub struct ContainerSession {
    daemon: Arc<dyn ContainerDaemon>,
    options: SessionOptions,
}

impl ContainerSession {
    pub fn new(daemon: Arc<dyn ContainerDaemon>, options: SessionOptions) -> Self {
        Self { daemon, options }
    }

    /// Create, run and tear down one container
    pub async fn run(&self, spec: &ContainerSpec, io: SessionIo) -> Result<SessionReport> {
        let id = self.daemon.create(spec).await?;
        info!("Created container {} ({})", spec.name, short_id(&id));

        match self.drive(&id, spec, io).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.discard(&id).await;
                Err(e)
            }
        }
    }

    async fn drive(&self, id: &str, spec: &ContainerSpec, io: SessionIo) -> Result<SessionReport> {
        let attachment = self.daemon.attach(id).await?;
        let wait = self.daemon.wait(id);

        let (tx, mut rx) = mpsc::channel::<SessionEvent>(16);
        let mut tasks = SessionTasks::default();

        let SessionIo {
            sinks,
            stdin,
            interrupts,
        } = io;
        tasks.push(spawn_interrupt_listener(interrupts, tx.clone()));

        let before = match self.daemon.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Container snapshot unavailable, skipping leak check: {}", e);
                None
            }
        };

        // give the wait task a chance to reach the daemon
        tokio::task::yield_now().await;
        self.daemon.start(id).await?;
        debug!("Started container {}", short_id(id));

        let stream_options = StreamOptions {
            strip_ansi: self.options.strip_ansi,
            filter_queries: spec.tty && spec.mode == SessionMode::Run,
        };

        let output_tx = tx.clone();
        let output = attachment.output;
        tasks.push(tokio::spawn(async move {
            let result = pump_output(output, sinks, stream_options).await;
            let _ = output_tx.send(SessionEvent::OutputDrained(result)).await;
        }));

        // the input half stays open for the whole session unless forwarded
        let _held_input = match (spec.open_stdin, stdin) {
            (true, Some(source)) => {
                let input = attachment.input;
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = forward_input(source, input).await {
                        debug!("stdin forwarding stopped: {}", e);
                    }
                }));
                None
            }
            _ => Some(attachment.input),
        };

        let wait_tx = tx.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = wait.outcome().await;
            let _ = wait_tx.send(SessionEvent::Exited(outcome)).await;
        }));

        // ====================================================================
        // Event loop
        // ====================================================================
        let mut exited: Option<WaitOutcome> = None;
        let mut drained = false;
        let mut interrupted = false;
        let mut stop_deadline: Option<Instant> = None;
        let mut probe_at: Option<Instant> = None;

        while !(exited.is_some() && drained) {
            let idle = Instant::now() + Duration::from_secs(3600);

            tokio::select! {
                event = rx.recv() => match event {
                    Some(SessionEvent::Exited(result)) => {
                        let outcome = result?;
                        debug!("Container {} exit observed: {:?}", short_id(id), outcome);
                        exited = Some(outcome);
                    }
                    Some(SessionEvent::OutputDrained(result)) => {
                        if let Err(e) = result {
                            warn!("Failed to copy container output: {}", e);
                        }
                        drained = true;
                        if exited.is_none() {
                            probe_at = Some(Instant::now() + EXIT_PROBE_DELAY);
                        }
                    }
                    Some(SessionEvent::Interrupted) if !interrupted => {
                        interrupted = true;
                        info!("Interrupted, stopping container {}", short_id(id));
                        stop_deadline =
                            Some(Instant::now() + self.options.stop_timeout + STOP_GRACE);
                        tasks.push(self.spawn_stop(id));
                    }
                    Some(SessionEvent::Interrupted) => {
                        warn!("Second interrupt, killing container {}", short_id(id));
                        let daemon = self.daemon.clone();
                        let id = id.to_string();
                        tasks.push(tokio::spawn(async move {
                            if let Err(e) = daemon.kill(&id).await {
                                warn!("Failed to kill container {}: {}", short_id(&id), e);
                            }
                        }));
                    }
                    None => break,
                },

                _ = sleep_until(probe_at.unwrap_or(idle)), if probe_at.is_some() => {
                    probe_at = None;
                    match self.daemon.exit_status(id).await {
                        Ok(WaitOutcome::Unknown) => {
                            probe_at = Some(Instant::now() + EXIT_PROBE_DELAY * 4);
                        }
                        Ok(outcome) if exited.is_none() => {
                            debug!("Exit of {} taken from inspect: {:?}", short_id(id), outcome);
                            exited = Some(outcome);
                        }
                        Ok(_) => {}
                        Err(e) => debug!("Exit probe failed: {}", e),
                    }
                }

                _ = sleep_until(stop_deadline.unwrap_or(idle)), if stop_deadline.is_some() => {
                    warn!(
                        "Container {} did not exit within {:?} of the interrupt",
                        short_id(id),
                        self.options.stop_timeout + STOP_GRACE
                    );
                    break;
                }
            }
        }
        drop(tasks);

        // ====================================================================
        // Teardown
        // ====================================================================
        let leaked = match before {
            Some(before) => self.check_leaks(id, &before).await,
            None => vec![],
        };

        if let Err(e) = self.daemon.remove(id, true).await {
            warn!("Failed to remove container {}: {}", short_id(id), e);
        }

        let exit_code = if interrupted {
            EXIT_INTERRUPTED
        } else {
            exited.map(|o| o.exit_code()).unwrap_or(0)
        };
        info!("Session {} finished with exit code {}", short_id(id), exit_code);

        Ok(SessionReport {
            container_id: id.to_string(),
            exit_code,
            outcome: exited,
            interrupted,
            leaked,
        })
    }

    /// Stop sequence run on the first interrupt
    fn spawn_stop(&self, id: &str) -> JoinHandle<()> {
        let daemon = self.daemon.clone();
        let id = id.to_string();
        let stop_timeout = self.options.stop_timeout;
        let nested = self.options.nested;

        tokio::spawn(async move {
            if nested {
                match daemon.snapshot().await {
                    Ok(snapshot) => {
                        let children = snapshot.children_of(&id);
                        if !children.is_empty() {
                            info!("Stopping {} child container(s)", children.len());
                        }
                        let stops = children
                            .iter()
                            .map(|child| daemon.stop(child, stop_timeout));
                        let results = futures::future::join_all(stops).await;
                        for (child, result) in children.iter().zip(results) {
                            if let Err(e) = result {
                                warn!("Failed to stop child {}: {}", short_id(child), e);
                            }
                        }
                    }
                    Err(e) => warn!("Could not list child containers: {}", e),
                }
            }

            match timeout(stop_timeout, daemon.stop(&id, stop_timeout)).await {
                Ok(Ok(())) => debug!("Container {} stopped", short_id(&id)),
                Ok(Err(e)) => {
                    warn!("Graceful stop failed ({}), killing {}", e, short_id(&id));
                    let _ = daemon.kill(&id).await;
                }
                Err(_) => {
                    warn!(
                        "Container {} ignored stop for {:?}, killing",
                        short_id(&id),
                        stop_timeout
                    );
                    let _ = daemon.kill(&id).await;
                }
            }
        })
    }

    /// Diff the daemon's containers against the pre-start snapshot
    async fn check_leaks(&self, id: &str, before: &ContainerSnapshot) -> Vec<(String, String)> {
        let after = match self.daemon.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Container snapshot unavailable, skipping leak check: {}", e);
                return vec![];
            }
        };

        let mut allowed: HashSet<String> = HashSet::new();
        allowed.insert(id.to_string());

        if self.options.auto_remove_children {
            for child in after.children_of(id) {
                if before.contains(&child) {
                    continue;
                }
                match self.daemon.remove(&child, true).await {
                    Ok(()) => debug!("Removed child container {}", short_id(&child)),
                    Err(e) => warn!("Failed to remove child container {}: {}", short_id(&child), e),
                }
                allowed.insert(child);
            }
        }

        let leaked = after.leaked_since(before, &allowed);
        for (leaked_id, name) in &leaked {
            warn!(
                "Container {} ({}) was left behind by this session",
                name,
                short_id(leaked_id)
            );
        }
        leaked
    }

    /// Best-effort removal of a container whose session failed
    async fn discard(&self, id: &str) {
        if let Err(e) = self.daemon.remove(id, true).await {
            debug!("Could not remove container {}: {}", short_id(id), e);
        }
    }
}

/// Handlers are installed before this returns; only the forwarding runs in the task
fn spawn_interrupt_listener(
    source: InterruptSource,
    tx: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    match source {
        InterruptSource::Os => {
            let signals = OsSignals::install();
            tokio::spawn(async move {
                let mut signals = signals;
                while signals.recv().await {
                    if tx.send(SessionEvent::Interrupted).await.is_err() {
                        break;
                    }
                }
            })
        }
        InterruptSource::Channel(mut rx) => tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if tx.send(SessionEvent::Interrupted).await.is_err() {
                    break;
                }
            }
        }),
    }
}

/// SIGINT and SIGTERM of this process
#[cfg(unix)]
struct OsSignals {
    interrupt: Option<tokio::signal::unix::Signal>,
    terminate: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl OsSignals {
    fn install() -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| warn!("Cannot listen for SIGINT: {}", e))
            .ok();
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| warn!("Cannot listen for SIGTERM: {}", e))
            .ok();
        Self {
            interrupt,
            terminate,
        }
    }

    /// `false` once no signal can arrive anymore
    async fn recv(&mut self) -> bool {
        match (self.interrupt.as_mut(), self.terminate.as_mut()) {
            (Some(int), Some(term)) => tokio::select! {
                r = int.recv() => r.is_some(),
                r = term.recv() => r.is_some(),
            },
            (Some(int), None) => int.recv().await.is_some(),
            (None, Some(term)) => term.recv().await.is_some(),
            (None, None) => false,
        }
    }
}

/// Ctrl-C of the console
#[cfg(windows)]
struct OsSignals {
    ctrl_c: Option<tokio::signal::windows::CtrlC>,
}

#[cfg(windows)]
impl OsSignals {
    fn install() -> Self {
        let ctrl_c = tokio::signal::windows::ctrl_c()
            .map_err(|e| warn!("Cannot listen for Ctrl-C: {}", e))
            .ok();
        Self { ctrl_c }
    }

    async fn recv(&mut self) -> bool {
        match self.ctrl_c.as_mut() {
            Some(ctrl_c) => ctrl_c.recv().await.is_some(),
            None => false,
        }
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
