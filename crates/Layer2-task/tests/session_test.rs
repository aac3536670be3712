//! Container session tests against an in-memory daemon
//!
//! `cargo test -p r2r-task --test session_test`

use async_trait::async_trait;
use futures::channel::{mpsc as fmpsc, oneshot};
use futures::{FutureExt, StreamExt};
use r2r_foundation::env_detect::PARENT_LABEL;
use r2r_foundation::{Error, ExtensionDefinition, ImageReference, PullPolicy};
use r2r_task::container::{
    Attachment, CaptureBuffer, ContainerInfo, ContainerSnapshot, DaemonError, OutputChunk,
    WaitHandle,
};
use r2r_task::{
    ContainerDaemon, ContainerSession, ContainerSpec, HostContext, ImageProvisioner,
    InterruptSource, OutputSinks, PullCredentials, SessionIo, SessionMode, SessionOptions,
    WaitOutcome, EXIT_INTERRUPTED,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

// ============================================================================
// FakeDaemon
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Exit with this status as soon as started
    Code(i64),
    /// Removed by someone else before the wait could see it
    Gone,
    /// Run until stopped or killed
    UntilStopped,
    /// The wait stream breaks as soon as the container starts
    WaitFails,
    /// The wait ends without reporting a status
    Unknown,
    /// Exit with this status; the wait never reports it, only inspect does
    Silent(i64),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    next_id: u32,
    session: Option<String>,
    containers: HashMap<String, ContainerInfo>,
    output: Option<fmpsc::UnboundedSender<Result<OutputChunk, DaemonError>>>,
    wait: Option<oneshot::Sender<Result<WaitOutcome, DaemonError>>>,
    /// What a wait registered from now on resolves with at once
    settled: Option<Result<WaitOutcome, DaemonError>>,
    exit_status: Option<WaitOutcome>,
    local_images: HashSet<String>,
    /// Containers that appear once the session container starts
    spawned_on_start: Vec<(String, ContainerInfo)>,
}

struct FakeDaemon {
    state: Arc<Mutex<FakeState>>,
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    exit: Exit,
    ignore_stop: bool,
    fail_start: bool,
    fail_pull: bool,
    /// The wait reaches the daemon only after this long
    wait_delay: Option<Duration>,
    /// Output keeps arriving this long after the exit
    output_delay: Option<Duration>,
    input: CaptureBuffer,
}

impl FakeDaemon {
    fn new(exit: Exit) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            stdout: vec![],
            stderr: vec![],
            exit,
            ignore_stop: false,
            fail_start: false,
            fail_pull: false,
            wait_delay: None,
            output_delay: None,
            input: CaptureBuffer::default(),
        }
    }

    fn with_stdout(mut self, chunks: &[&str]) -> Self {
        self.stdout = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        self
    }

    fn with_stderr(mut self, chunks: &[&str]) -> Self {
        self.stderr = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        self
    }

    fn with_container(self, id: &str, info: ContainerInfo) -> Self {
        self.lock().containers.insert(id.to_string(), info);
        self
    }

    fn spawning_on_start(self, id: &str, info: ContainerInfo) -> Self {
        self.lock().spawned_on_start.push((id.to_string(), info));
        self
    }

    fn with_local_image(self, image: &str) -> Self {
        self.lock().local_images.insert(image.to_string());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().calls.push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    /// Finish the session container: close output and report the exit
    fn finish(&self, outcome: WaitOutcome) {
        let mut state = self.lock();
        state.output = None;
        state.exit_status = Some(outcome);
        state.settled = Some(Ok(outcome));
        if let Some(wait) = state.wait.take() {
            let _ = wait.send(Ok(outcome));
        }
    }

    fn break_wait(&self) {
        let error = DaemonError::Other("wait stream broke".into());
        let mut state = self.lock();
        state.output = None;
        state.settled = Some(Err(error.clone()));
        if let Some(wait) = state.wait.take() {
            let _ = wait.send(Err(error));
        }
    }

    /// Emit the configured output, now or from a task after `output_delay`
    fn emit_output(&self) {
        let mut state = self.lock();
        let chunks: Vec<_> = self
            .stdout
            .iter()
            .map(|c| OutputChunk::Stdout(c.clone()))
            .chain(self.stderr.iter().map(|c| OutputChunk::Stderr(c.clone())))
            .collect();

        match self.output_delay {
            Some(delay) => {
                // the exit no longer closes this sender
                if let Some(output) = state.output.take() {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        for chunk in chunks {
                            let _ = output.unbounded_send(Ok(chunk));
                        }
                    });
                }
            }
            None => {
                if let Some(output) = &state.output {
                    for chunk in chunks {
                        let _ = output.unbounded_send(Ok(chunk));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ContainerDaemon for FakeDaemon {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, DaemonError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("{:0>64}", state.next_id);
        state.calls.push("create".to_string());
        state.session.get_or_insert_with(|| id.clone());
        state.containers.insert(
            id.clone(),
            ContainerInfo {
                name: spec.name.clone(),
                labels: spec.labels.clone().into_iter().collect(),
            },
        );
        Ok(id)
    }

    async fn attach(&self, _id: &str) -> Result<Attachment, DaemonError> {
        let (tx, rx) = fmpsc::unbounded();
        let mut state = self.lock();
        state.calls.push("attach".to_string());
        state.output = Some(tx);
        Ok(Attachment {
            output: rx.boxed(),
            input: Box::pin(self.input.clone()),
        })
    }

    /// Registers with the daemon when first polled, like a real wait request
    fn wait(&self, _id: &str) -> WaitHandle {
        self.record("wait");
        let state = self.state.clone();
        let delay = self.wait_delay;
        let silent = matches!(self.exit, Exit::Silent(_));

        WaitHandle::from_future(
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if silent {
                    return futures::future::pending::<Result<WaitOutcome, DaemonError>>().await;
                }
                let rx = {
                    let mut state = state.lock().unwrap();
                    state.calls.push("wait:registered".to_string());
                    if let Some(settled) = state.settled.clone() {
                        return settled;
                    }
                    let (tx, rx) = oneshot::channel();
                    state.wait = Some(tx);
                    rx
                };
                rx.await
                    .unwrap_or_else(|_| Err(DaemonError::Other("wait dropped".into())))
            }
            .boxed(),
        )
    }

    async fn start(&self, id: &str) -> Result<(), DaemonError> {
        self.record("start");
        if self.fail_start {
            return Err(DaemonError::StartFailed("no such image layer".into()));
        }

        {
            let mut state = self.lock();
            let spawned = std::mem::take(&mut state.spawned_on_start);
            state.containers.extend(spawned);
        }
        self.emit_output();

        match self.exit {
            Exit::Code(code) => self.finish(WaitOutcome::Completed(code)),
            Exit::Gone => {
                self.lock().containers.remove(id);
                self.finish(WaitOutcome::AlreadyGone);
            }
            Exit::UntilStopped => {}
            Exit::WaitFails => self.break_wait(),
            Exit::Unknown => self.finish(WaitOutcome::Unknown),
            Exit::Silent(code) => {
                let mut state = self.lock();
                state.output = None;
                state.exit_status = Some(WaitOutcome::Completed(code));
            }
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), DaemonError> {
        self.record(format!("stop:{}", id));
        let is_session = self.lock().session.as_deref() == Some(id);
        if !is_session {
            return Ok(());
        }
        if self.ignore_stop {
            futures::future::pending::<()>().await;
        }
        self.finish(WaitOutcome::Completed(143));
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<(), DaemonError> {
        self.record(format!("kill:{}", id));
        self.finish(WaitOutcome::Completed(137));
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), DaemonError> {
        let mut state = self.lock();
        state.calls.push(format!("remove:{}", id));
        state.containers.remove(id);
        Ok(())
    }

    async fn exit_status(&self, _id: &str) -> Result<WaitOutcome, DaemonError> {
        Ok(self.lock().exit_status.unwrap_or(WaitOutcome::Unknown))
    }

    async fn snapshot(&self) -> Result<ContainerSnapshot, DaemonError> {
        let state = self.lock();
        let mut snapshot = ContainerSnapshot::default();
        for (id, info) in &state.containers {
            snapshot.insert(id.clone(), info.clone());
        }
        Ok(snapshot)
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, DaemonError> {
        self.record(format!("inspect:{}", reference));
        Ok(self.lock().local_images.contains(reference))
    }

    async fn pull(
        &self,
        reference: &str,
        credentials: Option<&PullCredentials>,
    ) -> Result<(), DaemonError> {
        self.record(format!(
            "pull:{}:{}",
            reference,
            credentials.map(|c| c.username.as_str()).unwrap_or("-")
        ));
        if self.fail_pull {
            return Err(DaemonError::PullFailed("manifest unknown".into()));
        }
        self.lock().local_images.insert(reference.to_string());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn definition() -> ExtensionDefinition {
    ExtensionDefinition::new("pwsh", "ghcr.io/acme/pwsh:sha-1a2b3c")
}

fn spec_for(def: &ExtensionDefinition, host: &HostContext) -> ContainerSpec {
    let image = ImageReference::parse(&def.image).unwrap();
    ContainerSpec::for_extension(
        def,
        &image,
        SessionMode::Run,
        &["Get-Date".to_string()],
        host,
    )
    .unwrap()
}

fn terminal_host() -> HostContext {
    HostContext {
        stdin_is_terminal: true,
        ..Default::default()
    }
}

struct Harness {
    io: SessionIo,
    stdout: CaptureBuffer,
    stderr: CaptureBuffer,
    interrupts: mpsc::Sender<()>,
}

fn harness() -> Harness {
    let stdout = CaptureBuffer::default();
    let stderr = CaptureBuffer::default();
    let (tx, rx) = mpsc::channel(4);
    Harness {
        io: SessionIo {
            sinks: OutputSinks {
                stdout: Box::new(stdout.clone()),
                stderr: Box::new(stderr.clone()),
            },
            stdin: None,
            interrupts: InterruptSource::Channel(rx),
        },
        stdout,
        stderr,
        interrupts: tx,
    }
}

fn session(daemon: &Arc<FakeDaemon>, options: SessionOptions) -> ContainerSession {
    ContainerSession::new(daemon.clone(), options)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_attach_and_wait_precede_start() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)));
    let h = harness();
    session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    let calls = daemon.calls();
    let pos = |name: &str| calls.iter().position(|c| c.starts_with(name)).unwrap();
    assert!(pos("create") < pos("attach"));
    assert!(pos("attach") < pos("wait"));
    assert!(pos("wait") < pos("start"));
}

#[tokio::test]
async fn test_instant_exit_still_delivers_output() {
    let daemon = Arc::new(
        FakeDaemon::new(Exit::Code(0))
            .with_stdout(&["line 1\n", "line 2\n", "line 3\n"])
            .with_stderr(&["warn\n"]),
    );
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert_eq!(h.stdout.text(), "line 1\nline 2\nline 3\n");
    assert_eq!(h.stderr.text(), "warn\n");
}

#[tokio::test]
async fn test_container_exit_code_is_returned() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(3)));
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 3);
    assert_eq!(report.outcome, Some(WaitOutcome::Completed(3)));
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_externally_removed_container_is_not_an_error() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Gone).with_stdout(&["done\n"]));
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.outcome, Some(WaitOutcome::AlreadyGone));
    assert_eq!(h.stdout.text(), "done\n");
}

#[tokio::test]
async fn test_container_removed_after_exit() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)));
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    let calls = daemon.calls();
    let removed = calls
        .iter()
        .position(|c| *c == format!("remove:{}", report.container_id))
        .unwrap();
    assert!(calls.iter().position(|c| c == "start").unwrap() < removed);
}

#[tokio::test]
async fn test_late_wait_still_sees_fast_exit() {
    // the container is gone from the running set before the wait reaches the daemon
    let mut fake = FakeDaemon::new(Exit::Code(2)).with_stderr(&["bad flag\n"]);
    fake.wait_delay = Some(Duration::from_millis(100));
    let daemon = Arc::new(fake);
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 2);
    assert_eq!(report.outcome, Some(WaitOutcome::Completed(2)));
    assert_eq!(h.stderr.text(), "bad flag\n");

    // the status was still there to read, and the container is cleaned up afterwards
    let calls = daemon.calls();
    let registered = calls.iter().position(|c| c == "wait:registered").unwrap();
    let start = calls.iter().position(|c| c == "start").unwrap();
    let removed = calls
        .iter()
        .position(|c| *c == format!("remove:{}", report.container_id))
        .unwrap();
    assert!(start < registered);
    assert!(registered < removed);
}

#[tokio::test]
async fn test_wait_error_propagates_and_removes_container() {
    let daemon = Arc::new(FakeDaemon::new(Exit::WaitFails));
    let h = harness();
    let err = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap_err();

    match err {
        Error::Daemon(message) => assert!(message.contains("wait stream broke")),
        other => panic!("expected Daemon error, got {:?}", other),
    }
    assert!(daemon.called(&format!("remove:{:0>64}", 1)));
}

#[tokio::test]
async fn test_wait_without_status_exits_zero() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Unknown).with_stdout(&["bye\n"]));
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert_eq!(report.outcome, Some(WaitOutcome::Unknown));
    assert_eq!(h.stdout.text(), "bye\n");
    assert!(daemon.called("remove:"));
}

#[tokio::test]
async fn test_exit_read_from_inspect_when_wait_is_silent() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Silent(4)).with_stdout(&["partial\n"]));
    let h = harness();
    let started = Instant::now();
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        session(&daemon, SessionOptions::default())
            .run(&spec_for(&definition(), &terminal_host()), h.io),
    )
    .await
    .expect("session should end once inspect reports the exit")
    .unwrap();

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.outcome, Some(WaitOutcome::Completed(4)));
    assert_eq!(h.stdout.text(), "partial\n");
    // output closed first, the status came from inspect after the delay
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!daemon.called("wait:registered"));
}

#[tokio::test]
async fn test_output_arriving_after_exit_is_drained() {
    let mut fake = FakeDaemon::new(Exit::Code(5)).with_stdout(&["late 1\n", "late 2\n"]);
    fake.output_delay = Some(Duration::from_millis(200));
    let daemon = Arc::new(fake);
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 5);
    assert_eq!(h.stdout.text(), "late 1\nlate 2\n");
}

#[tokio::test]
async fn test_start_failure_removes_partial_container() {
    let mut fake = FakeDaemon::new(Exit::Code(0));
    fake.fail_start = true;
    let daemon = Arc::new(fake);
    let h = harness();
    let err = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Daemon(_)));
    assert!(daemon.called("remove:"));
}

#[tokio::test]
async fn test_piped_stdin_is_forwarded_and_closed() {
    let daemon = Arc::new(FakeDaemon::new(Exit::UntilStopped));
    let host = HostContext {
        stdin_is_terminal: false,
        ..Default::default()
    };
    let spec = spec_for(&definition(), &host);
    assert!(spec.open_stdin);

    let mut h = harness();
    h.io.stdin = Some(Box::new(&b"input data\n"[..]));

    let runner = {
        let daemon = daemon.clone();
        tokio::spawn(async move { session(&daemon, SessionOptions::default()).run(&spec, h.io).await })
    };

    // container reads stdin to EOF, then exits
    let deadline = Instant::now() + Duration::from_secs(5);
    while !daemon.input.is_closed() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(daemon.input.text(), "input data\n");
    daemon.finish(WaitOutcome::Completed(0));

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.exit_code, 0);
}

// ============================================================================
// Interruption
// ============================================================================

#[tokio::test]
async fn test_interrupt_stops_container_with_130() {
    let daemon = Arc::new(FakeDaemon::new(Exit::UntilStopped).with_stdout(&["working\n"]));
    let h = harness();
    let interrupts = h.interrupts.clone();
    let options = SessionOptions {
        stop_timeout: Duration::from_secs(1),
        ..Default::default()
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = interrupts.send(()).await;
    });

    let started = Instant::now();
    let report = session(&daemon, options)
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, EXIT_INTERRUPTED);
    assert!(report.interrupted);
    assert!(started.elapsed() < Duration::from_secs(1) + Duration::from_secs(2));
    assert!(daemon.called(&format!("stop:{}", report.container_id)));
    assert!(!daemon.called("kill:"));
    assert_eq!(h.stdout.text(), "working\n");
}

#[tokio::test]
async fn test_interrupt_before_start_is_honoured() {
    let daemon = Arc::new(FakeDaemon::new(Exit::UntilStopped));
    let h = harness();
    h.interrupts.send(()).await.unwrap();
    let options = SessionOptions {
        stop_timeout: Duration::from_secs(1),
        ..Default::default()
    };

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        session(&daemon, options).run(&spec_for(&definition(), &terminal_host()), h.io),
    )
    .await
    .expect("interrupt was lost")
    .unwrap();

    assert_eq!(report.exit_code, EXIT_INTERRUPTED);
    assert!(daemon.called(&format!("stop:{}", report.container_id)));
}

#[tokio::test]
async fn test_ignored_stop_falls_back_to_kill() {
    let mut fake = FakeDaemon::new(Exit::UntilStopped);
    fake.ignore_stop = true;
    let daemon = Arc::new(fake);
    let h = harness();
    let interrupts = h.interrupts.clone();
    let options = SessionOptions {
        stop_timeout: Duration::from_millis(200),
        ..Default::default()
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = interrupts.send(()).await;
    });

    let report = session(&daemon, options)
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, EXIT_INTERRUPTED);
    assert!(daemon.called("kill:"));
}

#[tokio::test]
async fn test_second_interrupt_kills_immediately() {
    let mut fake = FakeDaemon::new(Exit::UntilStopped);
    fake.ignore_stop = true;
    let daemon = Arc::new(fake);
    let h = harness();
    let interrupts = h.interrupts.clone();
    let options = SessionOptions {
        stop_timeout: Duration::from_secs(30),
        ..Default::default()
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = interrupts.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = interrupts.send(()).await;
    });

    let started = Instant::now();
    let report = session(&daemon, options)
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, EXIT_INTERRUPTED);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(daemon.called("kill:"));
}

#[tokio::test]
async fn test_nested_interrupt_stops_children_first() {
    // session container will be id 1 (see FakeDaemon::create)
    let session_id = format!("{:0>64}", 1);
    let daemon = Arc::new(
        FakeDaemon::new(Exit::UntilStopped).spawning_on_start(
            "child",
            ContainerInfo::new("r2r-inner").with_label(PARENT_LABEL, &session_id[..12]),
        ),
    );
    let h = harness();
    let interrupts = h.interrupts.clone();
    let options = SessionOptions {
        stop_timeout: Duration::from_secs(1),
        nested: true,
        auto_remove_children: true,
        ..Default::default()
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = interrupts.send(()).await;
    });

    let report = session(&daemon, options)
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    let calls = daemon.calls();
    let child_stop = calls.iter().position(|c| c == "stop:child").unwrap();
    let own_stop = calls
        .iter()
        .position(|c| *c == format!("stop:{}", session_id))
        .unwrap();
    assert!(child_stop < own_stop);
    assert_eq!(report.exit_code, EXIT_INTERRUPTED);
}

// ============================================================================
// Leak detection
// ============================================================================

#[tokio::test]
async fn test_leaked_container_reported() {
    let daemon = Arc::new(
        FakeDaemon::new(Exit::Code(0))
            .with_container("preexisting", ContainerInfo::new("db"))
            .spawning_on_start("stray", ContainerInfo::new("sidecar")),
    );
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();

    assert_eq!(report.exit_code, 0);
    assert_eq!(
        report.leaked,
        vec![("stray".to_string(), "sidecar".to_string())]
    );
}

#[tokio::test]
async fn test_labelled_children_removed_when_configured() {
    let session_id = format!("{:0>64}", 1);
    let child = ContainerInfo::new("r2r-inner").with_label(PARENT_LABEL, session_id.clone());

    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)).spawning_on_start("child", child.clone()));
    let h = harness();
    let options = SessionOptions {
        auto_remove_children: true,
        ..Default::default()
    };
    let report = session(&daemon, options)
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();
    assert!(report.leaked.is_empty());
    assert!(daemon.called("remove:child"));

    // without the flag the child counts as leaked
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)).spawning_on_start("child", child));
    let h = harness();
    let report = session(&daemon, SessionOptions::default())
        .run(&spec_for(&definition(), &terminal_host()), h.io)
        .await
        .unwrap();
    assert_eq!(report.leaked.len(), 1);
    assert!(!daemon.called("remove:child"));
}

// ============================================================================
// Image provisioning
// ============================================================================

fn image() -> ImageReference {
    ImageReference::parse("ghcr.io/acme/pwsh:sha-1a2b3c").unwrap()
}

#[tokio::test]
async fn test_if_not_present_skips_pull_for_local_image() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)).with_local_image(&image().to_string()));
    ImageProvisioner::new(daemon.clone())
        .ensure_present(&image(), PullPolicy::IfNotPresent, false)
        .await
        .unwrap();
    assert!(!daemon.called("pull:"));
}

#[tokio::test]
async fn test_if_not_present_pulls_missing_image_with_credentials() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)));
    let credentials = PullCredentials {
        username: "octo".into(),
        password: "token".into(),
        server: "ghcr.io".into(),
    };
    ImageProvisioner::new(daemon.clone())
        .with_credentials(Some(credentials))
        .ensure_present(&image(), PullPolicy::IfNotPresent, false)
        .await
        .unwrap();
    assert!(daemon
        .calls()
        .contains(&"pull:ghcr.io/acme/pwsh:sha-1a2b3c:octo".to_string()));
}

#[tokio::test]
async fn test_always_pulls() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)).with_local_image(&image().to_string()));
    ImageProvisioner::new(daemon.clone())
        .ensure_present(&image(), PullPolicy::Always, false)
        .await
        .unwrap();
    assert!(daemon.called("pull:"));
}

#[tokio::test]
async fn test_never_and_local_do_not_pull() {
    let daemon = Arc::new(FakeDaemon::new(Exit::Code(0)));
    let provisioner = ImageProvisioner::new(daemon.clone());

    let err = provisioner
        .ensure_present(&image(), PullPolicy::Never, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImageUnavailable { .. }));

    let err = provisioner
        .ensure_present(&image(), PullPolicy::Always, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImageUnavailable { .. }));
    assert!(!daemon.called("pull:"));
}

#[tokio::test]
async fn test_failed_pull_is_image_unavailable() {
    let mut fake = FakeDaemon::new(Exit::Code(0));
    fake.fail_pull = true;
    let daemon = Arc::new(fake);
    let err = ImageProvisioner::new(daemon)
        .ensure_present(&image(), PullPolicy::IfNotPresent, false)
        .await
        .unwrap_err();
    match err {
        Error::ImageUnavailable { image, message } => {
            assert_eq!(image, "ghcr.io/acme/pwsh:sha-1a2b3c");
            assert!(message.contains("manifest unknown"));
        }
        other => panic!("expected ImageUnavailable, got {:?}", other),
    }
}
