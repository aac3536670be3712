//! Container Module
//!
//! 확장 하나를 컨테이너 세션으로 실행합니다.
//!
//! - `spec`: 확장 정의 → 컨테이너 설정
//! - `daemon`: 데몬 추상화 (`ContainerDaemon`) + 대기 결과 (`WaitOutcome`)
//! - `docker`: bollard 기반 구현
//! - `stream`: 출력 복사 / stdin 전달 / 터미널 질의 필터
//! - `snapshot`: 누수 컨테이너 감지
//! - `session`: 세션 오케스트레이터

mod daemon;
mod docker;
mod session;
mod snapshot;
mod spec;
mod stream;

pub use daemon::{
    Attachment, ContainerDaemon, DaemonError, InputSink, OutputChunk, OutputStream,
    PullCredentials, WaitHandle, WaitOutcome,
};
pub use docker::DockerDaemon;
pub use session::{
    ContainerSession, InterruptSource, SessionIo, SessionOptions, SessionReport,
    EXIT_INTERRUPTED,
};
pub use snapshot::{ContainerInfo, ContainerSnapshot};
pub use spec::{
    current_dir_or_dot, ContainerSpec, HostContext, NetworkMode, ResourceLimits, SessionMode,
    VolumeMount, WORKSPACE_MOUNT,
};
pub use stream::{
    forward_input, pump_output, AnsiStripper, CaptureBuffer, OutputSinks, Sink, StreamOptions,
    TerminalQueryFilter,
};
