//! Output and input plumbing between the host and a session container

use super::daemon::{InputSink, OutputChunk, OutputStream};
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Terminal queries a container may emit when it believes it owns a tty.
/// Answering them is the terminal's job; in Run mode nobody will, and the
/// host terminal would answer into our stdin instead.
const TERMINAL_QUERIES: &[&[u8]] = &[
    b"\x1b[6n",         // DSR: cursor position
    b"\x1b[c",          // DA
    b"\x1b[0c",         // DA
    b"\x1b[>c",         // secondary DA
    b"\x1b]10;?\x07",   // OSC 10: foreground colour
    b"\x1b]10;?\x1b\\", // OSC 10 (ST)
    b"\x1b]11;?\x07",   // OSC 11: background colour
    b"\x1b]11;?\x1b\\", // OSC 11 (ST)
];

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Longest tail the ANSI stripper holds back waiting for a terminator
const MAX_HELD_BACK: usize = 4096;

// ============================================================================
// TerminalQueryFilter
// ============================================================================

/// Removes terminal query sequences from a raw stream
///
/// Sequences may be split across chunks; an incomplete prefix at the end of
/// a chunk is held back until the next one decides it.
#[derive(Debug, Default)]
pub struct TerminalQueryFilter {
    pending: Vec<u8>,
}

impl TerminalQueryFilter {
    pub fn filter(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(input.len());
        let mut i = 0;
        while i < input.len() {
            if input[i] == ESC {
                let rest = &input[i..];
                if let Some(query) = TERMINAL_QUERIES.iter().find(|q| rest.starts_with(q)) {
                    i += query.len();
                    continue;
                }
                if TERMINAL_QUERIES.iter().any(|q| q.starts_with(rest)) {
                    self.pending = rest.to_vec();
                    break;
                }
            }
            out.push(input[i]);
            i += 1;
        }
        out
    }

    /// Bytes still held back at end of stream
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

// ============================================================================
// AnsiStripper
// ============================================================================

/// Strips ANSI escape sequences from a chunked stream
///
/// An escape sequence or UTF-8 character cut off at the end of a chunk is
/// held back and stripped together with the next chunk.
#[derive(Debug, Default)]
pub struct AnsiStripper {
    pending: Vec<u8>,
}

impl AnsiStripper {
    pub fn strip(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let cut = incomplete_tail(&input);
        if input.len() - cut <= MAX_HELD_BACK {
            self.pending = input.split_off(cut);
        }
        strip_ansi_escapes::strip(&input)
    }

    /// Whatever is still held back at end of stream
    pub fn finish(&mut self) -> Vec<u8> {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            return rest;
        }
        strip_ansi_escapes::strip(&rest)
    }
}

/// Start of an unfinished escape sequence or UTF-8 character at the end of `bytes`
fn incomplete_tail(bytes: &[u8]) -> usize {
    if let Some(esc) = bytes.iter().rposition(|b| *b == ESC) {
        if !escape_complete(&bytes[esc..]) {
            return esc;
        }
    }

    let len = bytes.len();
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

fn escape_complete(seq: &[u8]) -> bool {
    match seq.get(1) {
        None => false,
        // CSI ends with a final byte
        Some(b'[') => seq[2..].iter().any(|b| (0x40..=0x7e).contains(b)),
        // OSC and the other strings end with BEL or ST
        Some(b']' | b'P' | b'X' | b'^' | b'_') => seq[2..].contains(&BEL),
        Some(_) => true,
    }
}

// ============================================================================
// Output
// ============================================================================

pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Where container output goes
pub struct OutputSinks {
    pub stdout: Sink,
    pub stderr: Sink,
}

impl OutputSinks {
    /// The host process's stdout / stderr
    pub fn host() -> Self {
        Self {
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub strip_ansi: bool,
    /// Drop terminal queries from the raw stream
    pub filter_queries: bool,
}

/// Copy container output to the sinks until the stream ends
///
/// A stream error ends the copy; whatever arrived before it is still written.
pub async fn pump_output(
    mut output: OutputStream,
    mut sinks: OutputSinks,
    options: StreamOptions,
) -> io::Result<()> {
    let mut queries = options.filter_queries.then(TerminalQueryFilter::default);
    let mut ansi_out = options.strip_ansi.then(AnsiStripper::default);
    let mut ansi_err = options.strip_ansi.then(AnsiStripper::default);
    let mut failure = None;

    while let Some(item) = output.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };

        match chunk {
            OutputChunk::Stdout(bytes) => {
                emit(&mut sinks.stdout, strip(&mut ansi_out, bytes)).await?
            }
            OutputChunk::Stderr(bytes) => {
                emit(&mut sinks.stderr, strip(&mut ansi_err, bytes)).await?
            }
            OutputChunk::Console(bytes) => {
                let bytes = match queries.as_mut() {
                    Some(filter) => filter.filter(&bytes),
                    None => bytes,
                };
                emit(&mut sinks.stdout, strip(&mut ansi_out, bytes)).await?
            }
        }
    }

    if let Some(mut filter) = queries {
        let rest = filter.finish();
        emit(&mut sinks.stdout, strip(&mut ansi_out, rest)).await?;
    }
    if let Some(mut stripper) = ansi_out {
        emit(&mut sinks.stdout, stripper.finish()).await?;
    }
    if let Some(mut stripper) = ansi_err {
        emit(&mut sinks.stderr, stripper.finish()).await?;
    }
    sinks.stdout.flush().await?;
    sinks.stderr.flush().await?;

    match failure {
        Some(e) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("output stream failed: {}", e),
        )),
        None => Ok(()),
    }
}

fn strip(stripper: &mut Option<AnsiStripper>, bytes: Vec<u8>) -> Vec<u8> {
    match stripper {
        Some(stripper) => stripper.strip(&bytes),
        None => bytes,
    }
}

async fn emit(sink: &mut Sink, bytes: Vec<u8>) -> io::Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    sink.write_all(&bytes).await?;
    sink.flush().await
}

// ============================================================================
// Input
// ============================================================================

/// Copy host input into the container; EOF half-closes the container's stdin
pub async fn forward_input<R>(mut source: R, mut input: InputSink) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let copied = tokio::io::copy(&mut source, &mut input).await?;
    input.shutdown().await?;
    debug!("Forwarded {} bytes of stdin", copied);
    Ok(copied)
}

// ============================================================================
// CaptureBuffer
// ============================================================================

/// In-memory sink whose contents stay readable after it is handed out
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl CaptureBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).to_string()
    }

    /// Whether `shutdown` was called
    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "capture buffer poisoned",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
        Poll::Ready(Ok(()))
    }
}
