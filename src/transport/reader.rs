//! Stream reader bridging raw process output to typed responses
//!
//! Stdout is read in arbitrary chunks and framed into lines; each non-blank
//! line goes through [`decode_line`]. Stderr lines surface as
//! `ErrorResponse { error: "CLI Error", .. }`. When all output is consumed the
//! reader publishes exactly one `Completion { stop_reason: "process_ended" }`
//! and closes the hub.

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use super::broadcast::Broadcaster;
use crate::message::{decode_line, CompletionResponse, ErrorResponse, Response};

/// Default maximum length of one output line (1MB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Error category for stderr output
pub const CLI_ERROR: &str = "CLI Error";

/// Error category for read and framing failures
pub const STREAM_ERROR: &str = "Stream Error";

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Incremental line framer over arbitrary byte chunks
///
/// A trailing partial line stays buffered until its terminator arrives or
/// [`LineFramer::finish`] is called at end of stream.
#[derive(Debug)]
pub struct LineFramer {
    codec: LinesCodec,
    buffer: BytesMut,
    max_line_length: usize,
}

impl LineFramer {
    /// Create a framer rejecting lines longer than `max_line_length` bytes
    pub fn new(max_line_length: usize) -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(max_line_length),
            buffer: BytesMut::new(),
            max_line_length,
        }
    }

    /// Feed a chunk and decode every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Response> {
        self.buffer.extend_from_slice(chunk);
        let mut responses = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => Self::accept(&line, &mut responses),
                Ok(None) => break,
                Err(err) => responses.push(self.framing_error(err)),
            }
        }
        responses
    }

    /// Flush the unterminated tail at end of stream
    pub fn finish(&mut self) -> Vec<Response> {
        let mut responses = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => Self::accept(&line, &mut responses),
                Ok(None) => break,
                Err(err) => responses.push(self.framing_error(err)),
            }
        }
        responses
    }

    /// Bytes buffered for the current partial line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn accept(line: &str, responses: &mut Vec<Response>) {
        if !line.trim().is_empty() {
            responses.push(decode_line(line));
        }
    }

    fn framing_error(&self, err: LinesCodecError) -> Response {
        let message = match err {
            LinesCodecError::MaxLineLengthExceeded => format!(
                "Line exceeded maximum length of {} bytes",
                self.max_line_length
            ),
            LinesCodecError::Io(e) => e.to_string(),
        };
        warn!(error = %message, "Dropping undecodable output line");
        Response::Error(ErrorResponse::new(STREAM_ERROR, message))
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

/// Background task feeding a [`Broadcaster`] from process output
#[derive(Debug)]
pub struct StreamReader {
    handle: JoinHandle<()>,
}

impl StreamReader {
    /// Read chunked stdout (and optionally stderr) until both reach EOF
    pub fn spawn<R, E>(
        stdout: R,
        stderr: Option<E>,
        hub: Broadcaster<Response>,
        max_line_length: usize,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(async move {
            let stdout_done = pump_stdout(stdout, &hub, max_line_length);
            let stderr_done = async {
                if let Some(stderr) = stderr {
                    pump_stderr(stderr, &hub, max_line_length).await;
                }
            };
            tokio::join!(stdout_done, stderr_done);
            complete(&hub);
        });
        Self { handle }
    }

    /// Read already line-delimited output
    pub fn spawn_lines<S>(mut lines: S, hub: Broadcaster<Response>) -> Self
    where
        S: Stream<Item = std::io::Result<String>> + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(async move {
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => {
                        hub.publish(decode_line(&line));
                    }
                    Err(e) => {
                        warn!(error = %e, "Agent output stream failed");
                        hub.publish(Response::Error(ErrorResponse::new(
                            STREAM_ERROR,
                            e.to_string(),
                        )));
                        break;
                    }
                }
            }
            complete(&hub);
        });
        Self { handle }
    }

    /// Handle for cancelling the reader from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Stop reading without emitting a completion
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the reader has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait until all output has been published
    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

async fn pump_stdout<R>(mut stdout: R, hub: &Broadcaster<Response>, max_line_length: usize)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new(max_line_length);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for response in framer.push(&chunk[..n]) {
                    hub.publish(response);
                }
            }
            Err(e) => {
                warn!(error = %e, "Agent stdout read failed");
                hub.publish(Response::Error(ErrorResponse::new(
                    STREAM_ERROR,
                    e.to_string(),
                )));
                return;
            }
        }
    }
    for response in framer.finish() {
        hub.publish(response);
    }
}

async fn pump_stderr<E>(stderr: E, hub: &Broadcaster<Response>, max_line_length: usize)
where
    E: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(max_line_length));
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    hub.publish(Response::Error(ErrorResponse::new(CLI_ERROR, line)));
                }
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                debug!("Skipping oversized stderr line");
            }
            Err(LinesCodecError::Io(e)) => {
                warn!(error = %e, "Agent stderr read failed");
                hub.publish(Response::Error(ErrorResponse::new(
                    STREAM_ERROR,
                    e.to_string(),
                )));
                break;
            }
        }
    }
}

fn complete(hub: &Broadcaster<Response>) {
    debug!("Agent output ended");
    hub.publish(Response::Completion(CompletionResponse::process_ended()));
    hub.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_buffers_partial_lines() {
        let mut framer = LineFramer::default();
        assert!(framer.push(br#"{"type":"te"#).is_empty());
        assert!(framer.buffered_len() > 0);

        let responses = framer.push(b"xt\",\"text\":\"hi\"}\n\n   \n");
        assert_eq!(responses.len(), 1);
        assert!(matches!(&responses[0], Response::Text(t) if t.text == "hi"));
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_framer_flushes_tail_at_eof() {
        let mut framer = LineFramer::default();
        assert!(framer.push(br#"{"type":"text","text":"tail"}"#).is_empty());
        let responses = framer.finish();
        assert_eq!(responses.len(), 1);
        assert!(framer.finish().is_empty());
    }

    #[test]
    fn test_framer_handles_crlf() {
        let mut framer = LineFramer::default();
        let responses = framer.push(b"{\"type\":\"text\",\"text\":\"a\"}\r\n");
        assert!(matches!(&responses[0], Response::Text(t) if t.text == "a"));
    }

    #[test]
    fn test_framer_rejects_oversized_line_and_recovers() {
        let mut framer = LineFramer::new(32);
        let mut responses = framer.push(&[b'x'; 40]);
        responses.extend(framer.push(b"yyy\n{\"type\":\"text\",\"text\":\"ok\"}\n"));

        assert!(matches!(&responses[0], Response::Error(e) if e.error == STREAM_ERROR));
        assert!(matches!(responses.last(), Some(Response::Text(t)) if t.text == "ok"));
    }

    #[tokio::test]
    async fn test_reader_emits_single_completion() {
        let hub = Broadcaster::new();
        let mut sub = hub.subscribe();
        let stdout: &[u8] = b"{\"type\":\"text\",\"text\":\"one\"}\nnot json\n";
        let stderr: &[u8] = b"warning: something\n\n";

        StreamReader::spawn(stdout, Some(stderr), hub.clone(), DEFAULT_MAX_LINE_LENGTH)
            .wait()
            .await;

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 4);
        let completions = events
            .iter()
            .filter(|e| matches!(e, Response::Completion(_)))
            .count();
        assert_eq!(completions, 1);
        assert!(matches!(events.last(), Some(Response::Completion(c)) if c.stop_reason == "process_ended"));
        assert!(events
            .iter()
            .any(|e| matches!(e, Response::Error(err) if err.error == CLI_ERROR && err.message == "warning: something")));
        assert!(hub.is_closed());
    }
}
